// Command-line surface: argument parsing and command dispatch.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};

use pickem_core::config::{DraftConfig, ScoringConfig};
use pickem_core::draft::{PickRequest, PickService};
use pickem_core::model::{
    GameId, GameStatus, LeagueId, LeagueMembership, PickId, PlayerId, Position, Role, UserId,
};
use pickem_core::refresh::{RefreshOutcome, StatusRefresher};
use pickem_core::settlement::{SettleError, SettlementCoordinator, SettlementReport};
use pickem_core::source::GameDataSource;
use pickem_core::store::{NewGame, NewPlayer, Store, UpsertOutcome};

#[derive(Parser, Debug)]
#[command(name = "pickem", version, about = "NHL pick'em scoring and settlement", long_about = None)]
pub struct Cli {
    /// Directory holding config/ and defaults/
    #[arg(long, env = "PICKEM_HOME", default_value = ".", global = true)]
    pub home: PathBuf,

    /// Serve box scores from `<dir>/<game_ref>.json` instead of the NHL API
    #[arg(long, global = true)]
    pub offline: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Load players, games and league memberships from a JSON file
    Seed { file: PathBuf },
    /// Score every pick for a final game and credit standings
    Settle { game: GameId },
    /// Pull status and score from upstream and lock picks that are due
    Refresh {
        /// Refresh only this game
        #[arg(long)]
        game: Option<GameId>,
        /// Settle any game observed final
        #[arg(long)]
        settle: bool,
    },
    /// Move the first drafter to the back of the league's order; everyone else moves up one
    RotateDraft { league: LeagueId },
    /// Replace the league's draft order (comma separated user ids)
    SetDraft {
        league: LeagueId,
        #[arg(value_delimiter = ',')]
        users: Vec<UserId>,
    },
    /// Show how a settled pick's points were computed
    Breakdown { pick: PickId },
    /// Create or replace a pick
    Submit(SubmitArgs),
    /// Print a league's standings
    Standings { league: LeagueId },
}

#[derive(Args, Debug, PartialEq)]
#[command(group(ArgGroup::new("selection").required(true).args(["player", "team"])))]
pub struct SubmitArgs {
    /// User performing the submission
    #[arg(long)]
    pub actor: UserId,
    /// User the pick belongs to (defaults to the actor)
    #[arg(long)]
    pub user: Option<UserId>,
    #[arg(long)]
    pub league: LeagueId,
    #[arg(long)]
    pub game: GameId,
    /// Pick this player
    #[arg(long)]
    pub player: Option<PlayerId>,
    /// Pick the team
    #[arg(long)]
    pub team: bool,
}

impl SubmitArgs {
    fn request(&self) -> PickRequest {
        match self.player {
            Some(id) => PickRequest {
                pick_type: "player".into(),
                player_id: Some(id),
            },
            None => PickRequest {
                pick_type: "team".into(),
                player_id: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Seed file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    players: Vec<SeedPlayer>,
    #[serde(default)]
    games: Vec<SeedGame>,
    #[serde(default)]
    memberships: Vec<SeedMembership>,
}

#[derive(Debug, Deserialize)]
struct SeedPlayer {
    name: String,
    #[serde(default)]
    jersey_number: Option<u8>,
    position: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    external_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SeedGame {
    opponent: String,
    is_home: bool,
    start_time: DateTime<Utc>,
    #[serde(default)]
    external_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SeedMembership {
    league_id: LeagueId,
    user_id: UserId,
    #[serde(default = "default_role")]
    role: Role,
}

fn default_true() -> bool {
    true
}

fn default_role() -> Role {
    Role::Member
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// The pipeline services wired to one store and one data source.
pub struct App {
    store: Arc<dyn Store>,
    picks: PickService,
    settlement: SettlementCoordinator,
    refresher: StatusRefresher,
}

impl App {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn GameDataSource>,
        draft: DraftConfig,
        scoring: ScoringConfig,
    ) -> Self {
        App {
            picks: PickService::new(store.clone(), draft),
            settlement: SettlementCoordinator::new(
                store.clone(),
                source.clone(),
                scoring.overtime_attribution.build(),
            ),
            refresher: StatusRefresher::new(store.clone(), source),
            store,
        }
    }

    pub async fn run(&self, command: &Command, now: DateTime<Utc>, out: &mut dyn Write) -> Result<()> {
        match command {
            Command::Seed { file } => self.seed(file, out).await,
            Command::Settle { game } => {
                let report = self.settlement.settle_game(*game, now).await?;
                write_report(out, &report)
            }
            Command::Refresh { game, settle } => self.refresh(*game, *settle, now, out).await,
            Command::RotateDraft { league } => {
                let order = self.picks.rotate_draft_order(*league).await?;
                writeln!(out, "league {league} draft order: {}", join_ids(order.users()))?;
                Ok(())
            }
            Command::SetDraft { league, users } => {
                let order = self.picks.set_draft_order(*league, users).await?;
                if order.is_set() {
                    writeln!(out, "league {league} draft order: {}", join_ids(order.users()))?;
                } else {
                    writeln!(out, "league {league} draft order cleared")?;
                }
                Ok(())
            }
            Command::Breakdown { pick } => {
                let explained = self.settlement.score_breakdown(*pick).await?;
                writeln!(
                    out,
                    "pick {} ({}) for game {}",
                    explained.pick.id, explained.pick.target, explained.pick.game_id
                )?;
                for term in &explained.breakdown.terms {
                    writeln!(out, "  {:<40} {:>3}", term.label, term.points)?;
                }
                writeln!(out, "  {:<40} {:>3}", "total", explained.breakdown.total)?;
                if !explained.matches_stored() {
                    writeln!(
                        out,
                        "  warning: stored points are {}",
                        explained.pick.points_earned
                    )?;
                }
                Ok(())
            }
            Command::Submit(args) => {
                let user = args.user.unwrap_or(args.actor);
                let submitted = self
                    .picks
                    .submit_pick(args.actor, user, args.league, args.game, &args.request(), now)
                    .await?;
                let verb = match submitted.outcome {
                    UpsertOutcome::Created => "created",
                    UpsertOutcome::Updated => "updated",
                };
                writeln!(
                    out,
                    "pick {} {verb}: user {} takes {} for game {}",
                    submitted.pick.id, submitted.pick.user_id, submitted.pick.target, submitted.pick.game_id
                )?;
                if submitted.locked_now {
                    writeln!(out, "every member has picked; game {} is locked", args.game)?;
                }
                Ok(())
            }
            Command::Standings { league } => {
                let members = self.store.memberships(*league).await?;
                if members.is_empty() {
                    bail!("league {league} has no members");
                }
                for (rank, member) in ranked(members) {
                    writeln!(out, "{rank:>3}. user {:<8} {:>5}", member.user_id, member.total_points)?;
                }
                Ok(())
            }
        }
    }

    async fn seed(&self, file: &Path, out: &mut dyn Write) -> Result<()> {
        let text = fs::read_to_string(file)
            .with_context(|| format!("failed to read seed file {}", file.display()))?;
        let seed: SeedFile = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse seed file {}", file.display()))?;

        for p in &seed.players {
            let position = Position::from_str_pos(&p.position)
                .with_context(|| format!("player {:?} has unknown position {:?}", p.name, p.position))?;
            let id = self
                .store
                .upsert_player(&NewPlayer {
                    name: p.name.clone(),
                    jersey_number: p.jersey_number,
                    position,
                    active: p.active,
                    external_id: p.external_id,
                })
                .await?;
            writeln!(out, "player {id}: {} ({position})", p.name)?;
        }
        for g in &seed.games {
            let id = self
                .store
                .upsert_game(&NewGame {
                    opponent: g.opponent.clone(),
                    is_home: g.is_home,
                    start_time: g.start_time,
                    external_id: g.external_id,
                })
                .await?;
            let venue = if g.is_home { "vs" } else { "at" };
            writeln!(out, "game {id}: {venue} {} {}", g.opponent, g.start_time.to_rfc3339())?;
        }
        for m in &seed.memberships {
            self.store.add_membership(m.league_id, m.user_id, m.role).await?;
        }
        info!(
            players = seed.players.len(),
            games = seed.games.len(),
            memberships = seed.memberships.len(),
            "seed loaded"
        );
        Ok(())
    }

    async fn refresh(
        &self,
        game: Option<GameId>,
        settle: bool,
        now: DateTime<Utc>,
        out: &mut dyn Write,
    ) -> Result<()> {
        let outcomes = match game {
            Some(id) => vec![self.refresher.refresh_game(id, now).await?],
            None => {
                let outcomes = self.refresher.refresh_started(now).await?;
                let locked = self.refresher.lock_due_games(now).await?;
                if locked > 0 {
                    writeln!(out, "locked {locked} picks on started games")?;
                }
                outcomes
            }
        };

        for outcome in &outcomes {
            write_refresh(out, outcome)?;
        }
        if !settle {
            return Ok(());
        }

        for outcome in outcomes.iter().filter(|o| o.status == GameStatus::Final) {
            match self.settlement.settle_game(outcome.game_id, now).await {
                Ok(report) => write_report(out, &report)?,
                Err(SettleError::AlreadySettled(id)) => {
                    writeln!(out, "game {id} already settled")?;
                }
                Err(e @ SettleError::UpstreamData(_)) => {
                    warn!(game_id = outcome.game_id, error = %e, "settlement deferred");
                    writeln!(out, "game {} not settled: {e}", outcome.game_id)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn join_ids(ids: &[UserId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn score_str(score: Option<u32>) -> String {
    score.map_or_else(|| "-".into(), |s| s.to_string())
}

fn write_refresh(out: &mut dyn Write, outcome: &RefreshOutcome) -> Result<()> {
    writeln!(
        out,
        "game {}: {} {}-{}{}",
        outcome.game_id,
        outcome.status,
        score_str(outcome.team_score),
        score_str(outcome.opponent_score),
        if outcome.locked > 0 {
            format!(", locked {} picks", outcome.locked)
        } else {
            String::new()
        }
    )?;
    Ok(())
}

fn write_report(out: &mut dyn Write, report: &SettlementReport) -> Result<()> {
    writeln!(
        out,
        "settled game {} (run {}): {} picks scored, {} skipped, {} zero records",
        report.game_id,
        report.run_id,
        report.picks_updated,
        report.skipped.len(),
        report.synthesized
    )?;
    for delta in &report.deltas {
        writeln!(
            out,
            "  league {} user {} +{}",
            delta.league_id, delta.user_id, delta.points
        )?;
    }
    for skipped in &report.skipped {
        writeln!(out, "  skipped pick {}: {:?}", skipped.pick_id, skipped.reason)?;
    }
    Ok(())
}

/// Order by points, highest first; tied members share a rank.
fn ranked(mut members: Vec<LeagueMembership>) -> Vec<(usize, LeagueMembership)> {
    members.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then(a.user_id.cmp(&b.user_id))
    });
    let mut rows = Vec::with_capacity(members.len());
    let mut rank = 0;
    let mut last = None;
    for (i, member) in members.into_iter().enumerate() {
        if last != Some(member.total_points) {
            rank = i + 1;
            last = Some(member.total_points);
        }
        rows.push((rank, member));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pickem_core::model::PickTarget;
    use pickem_core::normalize::RawBoxScore;
    use pickem_core::source::StaticSource;
    use pickem_core::store::SqliteStore;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 11, 3, 0, 0).unwrap()
    }

    fn seed_json() -> String {
        json!({
            "players": [
                {"name": "Jared McCann", "jersey_number": 19, "position": "C", "external_id": 8477955}
            ],
            "games": [
                {"opponent": "VAN", "is_home": true, "start_time": "2025-01-11T03:00:00Z", "external_id": 2024020650}
            ],
            "memberships": [
                {"league_id": 1, "user_id": 1, "role": "admin"},
                {"league_id": 1, "user_id": 2}
            ]
        })
        .to_string()
    }

    fn final_box() -> RawBoxScore {
        RawBoxScore::from_json(json!({
            "gameState": "OFF",
            "homeTeam": {"abbrev": "SEA", "score": 5},
            "awayTeam": {"abbrev": "VAN", "score": 0},
            "gameOutcome": {"lastPeriodType": "REG"},
            "playerByGameStats": {
                "homeTeam": {
                    "forwards": [{"playerId": 8477955, "goals": 1, "assists": 1, "powerPlayGoals": 1}],
                    "goalies": []
                },
                "awayTeam": {}
            }
        }))
        .unwrap()
    }

    async fn seeded_app(tag: &str) -> (App, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let source = Arc::new(StaticSource::new().with_box_score(2024020650, final_box()));
        let app = App::new(
            store.clone(),
            source,
            DraftConfig::default(),
            ScoringConfig::default(),
        );

        let path = std::env::temp_dir().join(format!("pickem-seed-{tag}-{}.json", std::process::id()));
        fs::write(&path, seed_json()).unwrap();
        let mut out = Vec::new();
        app.run(&Command::Seed { file: path.clone() }, start(), &mut out)
            .await
            .unwrap();
        fs::remove_file(&path).unwrap();
        (app, store)
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_submit_with_player() {
        let cli = Cli::try_parse_from([
            "pickem", "submit", "--actor", "1", "--league", "2", "--game", "3", "--player", "4",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Submit(SubmitArgs {
                actor: 1,
                user: None,
                league: 2,
                game: 3,
                player: Some(4),
                team: false,
            })
        );
    }

    #[test]
    fn submit_needs_exactly_one_selection() {
        let base = ["pickem", "submit", "--actor", "1", "--league", "2", "--game", "3"];
        assert!(Cli::try_parse_from(base).is_err());
        let both: Vec<&str> = base.iter().copied().chain(["--player", "4", "--team"]).collect();
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn parses_refresh_and_global_flags() {
        let cli = Cli::try_parse_from([
            "pickem", "refresh", "--settle", "--home", "/srv/pickem", "--offline", "captures",
        ])
        .unwrap();
        assert_eq!(cli.home, PathBuf::from("/srv/pickem"));
        assert_eq!(cli.offline, Some(PathBuf::from("captures")));
        assert_eq!(cli.command, Command::Refresh { game: None, settle: true });
    }

    #[test]
    fn parses_set_draft_list() {
        let cli = Cli::try_parse_from(["pickem", "set-draft", "7", "3,1,2"]).unwrap();
        assert_eq!(
            cli.command,
            Command::SetDraft {
                league: 7,
                users: vec![3, 1, 2]
            }
        );
    }

    #[tokio::test]
    async fn seed_then_pick_settle_and_rank() {
        let (app, store) = seeded_app("flow").await;
        let before = start() - chrono::Duration::hours(2);

        let mut out = Vec::new();
        let submit = Command::Submit(SubmitArgs {
            actor: 1,
            user: None,
            league: 1,
            game: 1,
            player: Some(1),
            team: false,
        });
        app.run(&submit, before, &mut out).await.unwrap();
        let team = Command::Submit(SubmitArgs {
            actor: 2,
            user: None,
            league: 1,
            game: 1,
            player: None,
            team: true,
        });
        app.run(&team, before, &mut out).await.unwrap();
        let printed = text(out);
        assert!(printed.contains("takes Jared McCann"), "{printed}");
        assert!(printed.contains("game 1 is locked"), "{printed}");

        let mut out = Vec::new();
        app.run(&Command::Refresh { game: Some(1), settle: true }, start(), &mut out)
            .await
            .unwrap();
        let printed = text(out);
        assert!(printed.contains("game 1: final 5-0"), "{printed}");
        assert!(printed.contains("settled game 1"), "{printed}");

        // McCann: goal 2 + assist 1. Team: five goals in a win.
        let members = store.memberships(1).await.unwrap();
        let total = |u| members.iter().find(|m| m.user_id == u).unwrap().total_points;
        assert_eq!(total(1), 3);
        assert_eq!(total(2), 5);

        let mut out = Vec::new();
        app.run(&Command::Standings { league: 1 }, start(), &mut out)
            .await
            .unwrap();
        let lines: Vec<String> = text(out).lines().map(str::to_string).collect();
        assert!(lines[0].starts_with("  1. user 2"), "{lines:?}");
        assert!(lines[1].starts_with("  2. user 1"), "{lines:?}");

        let pick = store.find_pick(1, 1, 1).await.unwrap().unwrap();
        assert!(matches!(pick.target, PickTarget::Player { .. }));
        let mut out = Vec::new();
        app.run(&Command::Breakdown { pick: pick.id }, start(), &mut out)
            .await
            .unwrap();
        let printed = text(out);
        assert!(printed.contains("total"), "{printed}");
        assert!(!printed.contains("warning"), "{printed}");
    }

    #[tokio::test]
    async fn second_settle_is_an_error() {
        let (app, _) = seeded_app("resettle").await;
        let mut out = Vec::new();
        app.run(&Command::Refresh { game: Some(1), settle: false }, start(), &mut out)
            .await
            .unwrap();
        app.run(&Command::Settle { game: 1 }, start(), &mut out)
            .await
            .unwrap();
        let err = app
            .run(&Command::Settle { game: 1 }, start(), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already been settled"));
    }

    #[tokio::test]
    async fn rotate_draft_sends_first_drafter_to_the_back() {
        let (app, _) = seeded_app("rotate").await;
        let mut out = Vec::new();
        app.run(&Command::SetDraft { league: 1, users: vec![2, 1] }, start(), &mut out)
            .await
            .unwrap();
        app.run(&Command::RotateDraft { league: 1 }, start(), &mut out)
            .await
            .unwrap();
        let printed = text(out);
        assert!(printed.ends_with("league 1 draft order: 1, 2\n"), "{printed}");
    }

    #[test]
    fn ties_share_a_rank() {
        let member = |user_id, total_points| LeagueMembership {
            league_id: 1,
            user_id,
            role: Role::Member,
            draft_position: None,
            total_points,
        };
        let rows = ranked(vec![member(3, 5), member(1, 9), member(2, 5)]);
        let summary: Vec<(usize, UserId)> = rows.iter().map(|(r, m)| (*r, m.user_id)).collect();
        assert_eq!(summary, vec![(1, 1), (2, 2), (2, 3)]);
    }
}
