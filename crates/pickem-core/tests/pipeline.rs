// Integration tests for the pick'em pipeline.
//
// These drive picks, status refresh, and settlement together through the
// library's public API against an in-memory store and a static data source.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use pickem_core::config::{DraftConfig, ScoringConfig};
use pickem_core::draft::{DraftOrder, LockReason, PickError, PickRequest, PickService};
use pickem_core::model::{GameId, GameStatus, LeagueId, PlayerId, Position, Role, UserId};
use pickem_core::normalize::RawBoxScore;
use pickem_core::refresh::StatusRefresher;
use pickem_core::scoring::OvertimeAttributionKind;
use pickem_core::settlement::{SettleError, SettlementCoordinator};
use pickem_core::source::{GameDataSource, StaticSource, UpstreamGameState};
use pickem_core::store::{NewGame, NewPlayer, SqliteStore, Store, UpsertOutcome};

// ===========================================================================
// Test helpers
// ===========================================================================

const OT_GAME_REF: i64 = 2024020718;
const ADMIN: UserId = 1;

fn ot_win_box_score() -> RawBoxScore {
    let value: serde_json::Value =
        serde_json::from_str(include_str!("fixtures/gamecenter_ot_win.json")).unwrap();
    RawBoxScore::from_json(value).unwrap()
}

fn puck_drop() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 18, 3, 0, 0).unwrap()
}

fn morning() -> DateTime<Utc> {
    puck_drop() - Duration::hours(8)
}

fn after_game() -> DateTime<Utc> {
    puck_drop() + Duration::hours(3)
}

struct Roster {
    mccann: PlayerId,
    beniers: PlayerId,
    dunn: PlayerId,
    grubauer: PlayerId,
    daccord: PlayerId,
    scratched: PlayerId,
}

struct World {
    store: Arc<SqliteStore>,
    source: Arc<StaticSource>,
    picks: PickService,
    roster: Roster,
}

impl World {
    async fn new(source: StaticSource) -> Self {
        Self::with_rules(source, DraftConfig::default()).await
    }

    async fn with_rules(source: StaticSource, rules: DraftConfig) -> Self {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let add = |name: &str, position: Position, external_id: i64| {
            let store = store.clone();
            let player = NewPlayer {
                name: name.into(),
                jersey_number: None,
                position,
                active: true,
                external_id: Some(external_id),
            };
            async move { store.upsert_player(&player).await.unwrap() }
        };
        let roster = Roster {
            mccann: add("Jared McCann", Position::Forward, 8477955).await,
            beniers: add("Matty Beniers", Position::Forward, 8482665).await,
            dunn: add("Vince Dunn", Position::Defense, 8480023).await,
            grubauer: add("Philipp Grubauer", Position::Goalie, 8478024).await,
            daccord: add("Joey Daccord", Position::Goalie, 8481020).await,
            scratched: add("Scratched Skater", Position::Defense, 8489999).await,
        };

        store.add_membership(1, ADMIN, Role::Admin).await.unwrap();
        for user in [2, 3, 4] {
            store.add_membership(1, user, Role::Member).await.unwrap();
        }
        store.add_membership(2, 2, Role::Admin).await.unwrap();
        store.add_membership(2, 5, Role::Member).await.unwrap();

        World {
            picks: PickService::new(store.clone(), rules),
            store,
            source: Arc::new(source),
            roster,
        }
    }

    async fn game(&self, external_id: i64, is_home: bool) -> GameId {
        self.store
            .upsert_game(&NewGame {
                opponent: "CGY".into(),
                is_home,
                start_time: puck_drop(),
                external_id: Some(external_id),
            })
            .await
            .unwrap()
    }

    fn coordinator(&self, attribution: OvertimeAttributionKind) -> SettlementCoordinator {
        let source: Arc<dyn GameDataSource> = self.source.clone();
        SettlementCoordinator::new(self.store.clone(), source, attribution.build())
    }

    fn refresher(&self) -> StatusRefresher {
        let source: Arc<dyn GameDataSource> = self.source.clone();
        StatusRefresher::new(self.store.clone(), source)
    }

    async fn pick(&self, user: UserId, league: LeagueId, game: GameId, target: Option<PlayerId>) {
        let request = match target {
            Some(id) => PickRequest {
                pick_type: "player".into(),
                player_id: Some(id),
            },
            None => PickRequest {
                pick_type: "team".into(),
                player_id: None,
            },
        };
        self.picks
            .submit_pick(user, user, league, game, &request, morning())
            .await
            .unwrap();
    }

    async fn total(&self, league: LeagueId, user: UserId) -> i64 {
        self.store
            .membership(league, user)
            .await
            .unwrap()
            .unwrap()
            .total_points
    }

    async fn points(&self, user: UserId, league: LeagueId, game: GameId) -> u32 {
        self.store
            .find_pick(user, league, game)
            .await
            .unwrap()
            .unwrap()
            .points_earned
    }
}

fn team_request() -> PickRequest {
    PickRequest {
        pick_type: "team".into(),
        player_id: None,
    }
}

// ===========================================================================
// End-to-end game day
// ===========================================================================

#[tokio::test]
async fn overtime_game_day_settles_expected_points() {
    let world = World::new(StaticSource::new().with_box_score(OT_GAME_REF, ot_win_box_score())).await;
    let r = &world.roster;
    let game = world.game(OT_GAME_REF, true).await;

    world.pick(ADMIN, 1, game, Some(r.mccann)).await;
    world.pick(2, 1, game, Some(r.dunn)).await;
    world.pick(3, 1, game, Some(r.grubauer)).await;
    world.pick(4, 1, game, None).await;
    world.pick(2, 2, game, Some(r.mccann)).await;
    world.pick(5, 2, game, Some(r.beniers)).await;

    // Every member of both leagues picked, so both windows locked early.
    for pick in world.store.picks_for_game(game).await.unwrap() {
        assert_eq!(pick.locked_at, Some(morning()), "pick {} not locked", pick.id);
    }

    let refreshed = world.refresher().refresh_game(game, after_game()).await.unwrap();
    assert_eq!(refreshed.status, GameStatus::Final);
    assert_eq!((refreshed.team_score, refreshed.opponent_score), (Some(3), Some(2)));

    let report = world
        .coordinator(OvertimeAttributionKind::Approximate)
        .settle_game(game, after_game())
        .await
        .unwrap();
    assert_eq!(report.picks_updated, 6);
    assert!(report.skipped.is_empty());

    // McCann: regulation goal 2 + overtime goal 7 + shorthanded assist 2.
    assert_eq!(world.points(ADMIN, 1, game).await, 11);
    // Dunn: the approximation credits every scorer in an overtime win with
    // one overtime goal, so his shorthanded goal is 8 doubled.
    assert_eq!(world.points(2, 1, game).await, 16);
    // Grubauer allowed 2.
    assert_eq!(world.points(3, 1, game).await, 3);
    // 3-2 win is below the four-goal floor.
    assert_eq!(world.points(4, 1, game).await, 0);
    assert_eq!(world.points(2, 2, game).await, 11);
    assert_eq!(world.points(5, 2, game).await, 1);

    assert_eq!(world.total(1, ADMIN).await, 11);
    assert_eq!(world.total(1, 2).await, 16);
    assert_eq!(world.total(2, 2).await, 11);
    assert_eq!(world.total(1, 4).await, 0);

    let game_row = world.store.game(game).await.unwrap().unwrap();
    assert!(game_row.went_to_overtime);
    assert!(!game_row.went_to_shootout);
}

#[tokio::test]
async fn play_by_play_attribution_agrees_on_single_overtime_goal() {
    let world = World::new(StaticSource::new().with_box_score(OT_GAME_REF, ot_win_box_score())).await;
    let game = world.game(OT_GAME_REF, true).await;
    world.pick(ADMIN, 1, game, Some(world.roster.mccann)).await;
    world.pick(2, 1, game, Some(world.roster.dunn)).await;
    world
        .store
        .update_game_state(game, GameStatus::Final, Some(3), Some(2))
        .await
        .unwrap();

    let coordinator = world.coordinator(OvertimeAttributionKind::PlayByPlay);
    coordinator.settle_game(game, after_game()).await.unwrap();
    assert_eq!(world.points(ADMIN, 1, game).await, 11);
    // Dunn's goal came in regulation: exact data gives no overtime credit.
    assert_eq!(world.points(2, 1, game).await, 6);

    let pick = world.store.find_pick(ADMIN, 1, game).await.unwrap().unwrap();
    let audit = coordinator.score_breakdown(pick.id).await.unwrap();
    assert!(audit.matches_stored());
    assert_eq!(audit.breakdown.terms.len(), 3);
}

#[tokio::test]
async fn default_scoring_settles_overtime_fixture_from_per_goal_data() {
    let world = World::new(StaticSource::new().with_box_score(OT_GAME_REF, ot_win_box_score())).await;
    let game = world.game(OT_GAME_REF, true).await;
    world.pick(ADMIN, 1, game, Some(world.roster.mccann)).await;
    world.pick(2, 1, game, Some(world.roster.dunn)).await;
    // Final with no score recorded: settlement fills it from the box score.
    world
        .store
        .update_game_state(game, GameStatus::Final, None, None)
        .await
        .unwrap();

    let source: Arc<dyn GameDataSource> = world.source.clone();
    let coordinator = SettlementCoordinator::new(
        world.store.clone(),
        source,
        ScoringConfig::default().overtime_attribution.build(),
    );
    coordinator.settle_game(game, after_game()).await.unwrap();
    assert_eq!(world.points(ADMIN, 1, game).await, 11);
    assert_eq!(world.points(2, 1, game).await, 6);

    let game_row = world.store.game(game).await.unwrap().unwrap();
    assert_eq!(game_row.final_score(), Some((3, 2)));

    let pick = world.store.find_pick(2, 1, game).await.unwrap().unwrap();
    let audit = coordinator.score_breakdown(pick.id).await.unwrap();
    assert!(audit.matches_stored());
    assert_eq!(audit.breakdown.total, 6);
}

#[tokio::test]
async fn shootout_win_from_legacy_shape_has_no_overtime_bonus() {
    // We are the away side and win 3-2 in a shootout.
    let legacy = RawBoxScore::from_json(json!({
        "teams": {
            "home": {
                "teamStats": {"teamSkaterStats": {"goals": 2}},
                "players": {}
            },
            "away": {
                "teamStats": {"teamSkaterStats": {"goals": 3}},
                "players": {
                    "ID8477955": {
                        "person": {"id": 8477955},
                        "stats": {"skaterStats": {"goals": 1, "assists": 0}}
                    },
                    "ID8478024": {
                        "person": {"id": 8478024},
                        "stats": {"goalieStats": {"timeOnIce": "65:00", "shots": 31, "saves": 29}}
                    }
                }
            }
        },
        "linescore": {
            "currentPeriod": 5,
            "currentPeriodTimeRemaining": "Final",
            "hasShootout": true,
            "teams": {"home": {"goals": 2}, "away": {"goals": 3}}
        }
    }))
    .unwrap();

    let world = World::new(StaticSource::new().with_box_score(77, legacy)).await;
    let game = world.game(77, false).await;
    world.pick(ADMIN, 1, game, Some(world.roster.mccann)).await;
    world.pick(2, 1, game, Some(world.roster.grubauer)).await;
    world.pick(3, 1, game, None).await;

    world.refresher().refresh_game(game, after_game()).await.unwrap();
    world
        .coordinator(OvertimeAttributionKind::Approximate)
        .settle_game(game, after_game())
        .await
        .unwrap();

    assert_eq!(world.points(ADMIN, 1, game).await, 2);
    assert_eq!(world.points(2, 1, game).await, 3);
    assert_eq!(world.points(3, 1, game).await, 0);
    let row = world.store.game(game).await.unwrap().unwrap();
    assert!(row.went_to_shootout);
}

// ===========================================================================
// Settlement guarantees
// ===========================================================================

#[tokio::test]
async fn concurrent_settlement_runs_apply_once() {
    let world = World::new(StaticSource::new().with_box_score(OT_GAME_REF, ot_win_box_score())).await;
    let game = world.game(OT_GAME_REF, true).await;
    world.pick(ADMIN, 1, game, Some(world.roster.mccann)).await;
    world
        .store
        .update_game_state(game, GameStatus::Final, Some(3), Some(2))
        .await
        .unwrap();

    let a = world.coordinator(OvertimeAttributionKind::Approximate);
    let b = world.coordinator(OvertimeAttributionKind::Approximate);
    let (ra, rb) = tokio::join!(
        a.settle_game(game, after_game()),
        b.settle_game(game, after_game())
    );
    let outcomes = [ra.is_ok(), rb.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(
        ra.err().or(rb.err()),
        Some(SettleError::AlreadySettled(_))
    ));
    assert_eq!(world.total(1, ADMIN).await, 11);

    // A later retry is also a no-op.
    assert!(matches!(
        a.settle_game(game, after_game()).await,
        Err(SettleError::AlreadySettled(_))
    ));
    assert_eq!(world.total(1, ADMIN).await, 11);
}

#[tokio::test]
async fn totals_equal_sum_of_settled_picks() {
    let world = World::new(StaticSource::unavailable()).await;
    let mut earned = 0;
    for (ext, score) in [(101, (5, 1)), (102, (2, 3)), (103, (4, 0))] {
        let game = world.game(ext, true).await;
        world.pick(4, 1, game, None).await;
        world
            .store
            .update_game_state(game, GameStatus::Final, Some(score.0), Some(score.1))
            .await
            .unwrap();
        world
            .coordinator(OvertimeAttributionKind::Approximate)
            .settle_game(game, after_game())
            .await
            .unwrap();
        earned += i64::from(world.points(4, 1, game).await);
    }
    assert_eq!(earned, 9);
    assert_eq!(world.total(1, 4).await, earned);
}

#[tokio::test]
async fn unreported_players_get_persisted_zero_records() {
    let world = World::new(StaticSource::new().with_box_score(OT_GAME_REF, ot_win_box_score())).await;
    let game = world.game(OT_GAME_REF, true).await;
    world.pick(2, 1, game, Some(world.roster.scratched)).await;
    world.pick(3, 1, game, Some(world.roster.daccord)).await;
    world
        .store
        .update_game_state(game, GameStatus::Final, Some(3), Some(2))
        .await
        .unwrap();

    let report = world
        .coordinator(OvertimeAttributionKind::Approximate)
        .settle_game(game, after_game())
        .await
        .unwrap();
    assert_eq!(report.synthesized, 1);
    assert_eq!(world.points(2, 1, game).await, 0);
    // Listed but never played: no tier points.
    assert_eq!(world.points(3, 1, game).await, 0);

    let zero = world
        .store
        .performance(world.roster.scratched, game)
        .await
        .unwrap()
        .unwrap();
    assert!(zero.synthesized);
    assert_eq!(zero.goals + zero.assists, 0);
    let benched_goalie = world
        .store
        .performance(world.roster.daccord, game)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(benched_goalie.goals_against, None);
}

// ===========================================================================
// Picks and draft order
// ===========================================================================

#[tokio::test]
async fn lock_boundary_rejects_members_but_not_admins() {
    let world = World::new(StaticSource::unavailable()).await;
    let game = world.game(300, true).await;

    let err = world
        .picks
        .submit_pick(2, 2, 1, game, &team_request(), puck_drop())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PickError::AlreadyLocked {
            reason: LockReason::Started
        }
    ));

    let out = world
        .picks
        .submit_pick(ADMIN, 2, 1, game, &team_request(), puck_drop())
        .await
        .unwrap();
    assert_eq!(out.pick.user_id, 2);
    assert!(out.pick.is_locked());
}

#[tokio::test]
async fn repeated_submissions_keep_one_row() {
    let world = World::with_rules(
        StaticSource::unavailable(),
        DraftConfig {
            exclusive_player_picks: false,
            enforce_turn_order: false,
        },
    )
    .await;
    let game = world.game(301, true).await;
    let r = &world.roster;

    let mut outcomes = Vec::new();
    for target in [Some(r.mccann), None, Some(r.dunn)] {
        let request = match target {
            Some(id) => PickRequest {
                pick_type: "player".into(),
                player_id: Some(id),
            },
            None => team_request(),
        };
        let out = world
            .picks
            .submit_pick(3, 3, 1, game, &request, morning())
            .await
            .unwrap();
        outcomes.push(out.outcome);
    }
    assert_eq!(
        outcomes,
        vec![UpsertOutcome::Created, UpsertOutcome::Updated, UpsertOutcome::Updated]
    );
    let picks = world.store.picks_for_league_game(1, game).await.unwrap();
    assert_eq!(picks.len(), 1);
    assert_eq!(picks[0].target.player_id(), Some(r.dunn));
}

#[tokio::test]
async fn draft_rotation_shifts_positions() {
    let world = World::new(StaticSource::unavailable()).await;
    world.picks.set_draft_order(1, &[ADMIN, 2, 3, 4]).await.unwrap();

    world.picks.rotate_draft_order(1).await.unwrap();

    let positions: Vec<Option<u32>> = world
        .store
        .memberships(1)
        .await
        .unwrap()
        .iter()
        .map(|m| m.draft_position)
        .collect();
    assert_eq!(positions, vec![Some(4), Some(1), Some(2), Some(3)]);
    assert_eq!(
        world.picks.draft_order(1).await.unwrap(),
        DraftOrder::Ordered(vec![2, 3, 4, ADMIN])
    );
}

#[tokio::test]
async fn lock_due_games_stamps_started_games_only() {
    let world = World::new(StaticSource::new().with_game_state(
        400,
        UpstreamGameState {
            status: GameStatus::Scheduled,
            home_score: None,
            away_score: None,
        },
    ))
    .await;
    let game = world.game(400, true).await;
    world.pick(2, 1, game, None).await;

    let refresher = world.refresher();
    assert_eq!(refresher.lock_due_games(morning()).await.unwrap(), 0);
    assert_eq!(refresher.lock_due_games(puck_drop()).await.unwrap(), 1);
    let pick = world.store.find_pick(2, 1, game).await.unwrap().unwrap();
    assert_eq!(pick.locked_at, Some(puck_drop()));
}
