// Settlement: score every pick of a finished game once and credit standings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{
    Game, GameId, GameStatus, LeagueId, Pick, PickId, PickTarget, Player, PlayerId,
    PlayerPerformance, UserId,
};
use crate::normalize::{self, NormalizedBoxScore, Side};
use crate::scoring::{
    describe_target, score_pick, GameContext, OvertimeAttribution, PickInput, ScoreBreakdown,
};
use crate::source::{GameDataSource, SourceError};
use crate::store::{PickPoints, SettlementCommit, StandingDelta, Store};

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("game {0} does not exist")]
    UnknownGame(GameId),

    #[error("pick {0} does not exist")]
    UnknownPick(PickId),

    #[error("game {game_id} is not final (status {status})")]
    NotReady { game_id: GameId, status: GameStatus },

    #[error("game {0} has already been settled")]
    AlreadySettled(GameId),

    #[error("upstream data error: {0}")]
    UpstreamData(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Why a pick was left unscored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The pick names a player the store no longer has.
    MissingPlayer(PlayerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPick {
    pub pick_id: PickId,
    pub reason: SkipReason,
}

/// Outcome of one committed settlement run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReport {
    pub game_id: GameId,
    pub run_id: String,
    pub picks_updated: usize,
    pub skipped: Vec<SkippedPick>,
    /// Standings increments applied, one per (league, user) with nonzero points.
    pub deltas: Vec<StandingDelta>,
    /// Zero-stat records written for players the source did not report.
    pub synthesized: usize,
}

/// An existing pick's score, recomputed term by term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickBreakdown {
    pub pick: Pick,
    pub breakdown: ScoreBreakdown,
}

impl PickBreakdown {
    /// True when the recomputed total matches the stored `points_earned`.
    pub fn matches_stored(&self) -> bool {
        self.breakdown.total == self.pick.points_earned
    }
}

/// Settles finished games against a record store and an upstream source.
pub struct SettlementCoordinator {
    store: Arc<dyn Store>,
    source: Arc<dyn GameDataSource>,
    attribution: Box<dyn OvertimeAttribution>,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn GameDataSource>,
        attribution: Box<dyn OvertimeAttribution>,
    ) -> Self {
        SettlementCoordinator {
            store,
            source,
            attribution,
        }
    }

    /// Score and persist every pick for `game_id`, then credit standings.
    ///
    /// Nothing is written until the box score has been fetched; the claim,
    /// performances, pick points and standings go in one transaction.
    pub async fn settle_game(
        &self,
        game_id: GameId,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport, SettleError> {
        let game = self
            .store
            .game(game_id)
            .await?
            .ok_or(SettleError::UnknownGame(game_id))?;
        if game.is_settled() {
            return Err(SettleError::AlreadySettled(game_id));
        }
        if game.status != GameStatus::Final {
            return Err(SettleError::NotReady {
                game_id,
                status: game.status,
            });
        }

        let picks = self.store.picks_for_game(game_id).await?;
        info!(game_id, picks = picks.len(), "settlement started");

        let needs_box_score = game.final_score().is_none()
            || picks.iter().any(|p| p.target.player_id().is_some());
        let normalized = if needs_box_score && !picks.is_empty() {
            Some(self.fetch_normalized(&game).await?)
        } else {
            None
        };
        let context = settlement_context(&game, normalized.as_ref());

        let run_id = format!("settle-{game_id}-{}", now.format("%Y%m%dT%H%M%S%.3fZ"));
        let mut scored = PickScorer::new(game_id, normalized.as_ref());
        let mut pick_points = Vec::with_capacity(picks.len());
        let mut totals: BTreeMap<(LeagueId, UserId), i64> = BTreeMap::new();
        let mut skipped = Vec::new();

        for pick in &picks {
            let points = match &pick.target {
                PickTarget::Team => {
                    score_pick(
                        PickInput::Team {
                            team_goals: context.team_goals,
                            opponent_goals: context.opponent_goals,
                        },
                        &context,
                        self.attribution.as_ref(),
                    )
                    .total
                }
                PickTarget::Player { player_id, .. } => {
                    let player_id = *player_id;
                    let Some((player, performance)) =
                        scored.performance(self.store.as_ref(), player_id).await?
                    else {
                        warn!(
                            pick_id = pick.id,
                            player_id, "pick references a missing player, skipped"
                        );
                        skipped.push(SkippedPick {
                            pick_id: pick.id,
                            reason: SkipReason::MissingPlayer(player_id),
                        });
                        continue;
                    };
                    score_pick(
                        PickInput::Player {
                            position: player.position,
                            performance: &performance,
                        },
                        &context,
                        self.attribution.as_ref(),
                    )
                    .total
                }
            };
            debug!(
                pick_id = pick.id,
                user_id = pick.user_id,
                league_id = pick.league_id,
                selection = %describe_target(&pick.target),
                points,
                "pick scored"
            );
            pick_points.push(PickPoints {
                pick_id: pick.id,
                points,
            });
            *totals.entry((pick.league_id, pick.user_id)).or_default() += i64::from(points);
        }

        let deltas: Vec<StandingDelta> = totals
            .into_iter()
            .filter(|(_, points)| *points != 0)
            .map(|((league_id, user_id), points)| StandingDelta {
                league_id,
                user_id,
                points,
            })
            .collect();

        let synthesized = scored.synthesized;
        let final_score = game.final_score().or_else(|| {
            normalized
                .as_ref()
                .map(|n| (n.context.team_goals, n.context.opponent_goals))
        });
        let commit = SettlementCommit {
            game_id,
            run_id: run_id.clone(),
            settled_at: now,
            context,
            final_score,
            performances: scored.into_writes(),
            pick_points,
            deltas: deltas.clone(),
        };
        if !self.store.commit_settlement(&commit).await? {
            warn!(game_id, run_id, "another run settled the game first");
            return Err(SettleError::AlreadySettled(game_id));
        }

        info!(
            game_id,
            run_id,
            picks_updated = commit.pick_points.len(),
            skipped = skipped.len(),
            synthesized,
            "settlement committed"
        );
        Ok(SettlementReport {
            game_id,
            run_id,
            picks_updated: commit.pick_points.len(),
            skipped,
            deltas,
            synthesized,
        })
    }

    /// Recompute the formula terms behind an existing pick's points.
    pub async fn score_breakdown(&self, pick_id: PickId) -> Result<PickBreakdown, SettleError> {
        let pick = self
            .store
            .pick(pick_id)
            .await?
            .ok_or(SettleError::UnknownPick(pick_id))?;
        let game = self
            .store
            .game(pick.game_id)
            .await?
            .ok_or(SettleError::UnknownGame(pick.game_id))?;
        let context = match game.context() {
            Some(context) if game.status == GameStatus::Final => context,
            _ => {
                return Err(SettleError::NotReady {
                    game_id: game.id,
                    status: game.status,
                })
            }
        };

        let breakdown = match &pick.target {
            PickTarget::Team => score_pick(
                PickInput::Team {
                    team_goals: context.team_goals,
                    opponent_goals: context.opponent_goals,
                },
                &context,
                self.attribution.as_ref(),
            ),
            PickTarget::Player { player_id, .. } => {
                let player = self.store.player(*player_id).await?.ok_or_else(|| {
                    anyhow::anyhow!("pick {pick_id} references missing player {player_id}")
                })?;
                let performance = self
                    .store
                    .performance(*player_id, game.id)
                    .await?
                    .unwrap_or_else(|| PlayerPerformance::zero(*player_id, game.id));
                score_pick(
                    PickInput::Player {
                        position: player.position,
                        performance: &performance,
                    },
                    &context,
                    self.attribution.as_ref(),
                )
            }
        };

        Ok(PickBreakdown { pick, breakdown })
    }

    async fn fetch_normalized(&self, game: &Game) -> Result<NormalizedBoxScore, SettleError> {
        let game_ref = game.external_id.unwrap_or(game.id);
        let raw = self.source.fetch_box_score(game_ref).await.map_err(|e| {
            warn!(game_id = game.id, game_ref, error = %e, "box score fetch failed");
            e
        })?;
        Ok(normalize::normalize(&raw, Side::from_is_home(game.is_home)))
    }
}

/// Context for scoring: box-score flags, with the stored official score
/// taking precedence over the box score's.
fn settlement_context(game: &Game, normalized: Option<&NormalizedBoxScore>) -> GameContext {
    let mut context = match normalized {
        Some(n) => n.context,
        None => GameContext {
            is_overtime: game.went_to_overtime,
            is_shootout: game.went_to_shootout,
            ..GameContext::default()
        },
    };
    // Without a stored score the box score was fetched and already holds one.
    if let Some((team_goals, opponent_goals)) = game.final_score() {
        context.team_goals = team_goals;
        context.opponent_goals = opponent_goals;
    }
    context
}

/// Per-run cache of player performances, tracking which ones need writing.
struct PickScorer<'a> {
    game_id: GameId,
    normalized: Option<&'a NormalizedBoxScore>,
    resolved: HashMap<PlayerId, Option<(Player, PlayerPerformance)>>,
    writes: Vec<PlayerPerformance>,
    synthesized: usize,
}

impl<'a> PickScorer<'a> {
    fn new(game_id: GameId, normalized: Option<&'a NormalizedBoxScore>) -> Self {
        PickScorer {
            game_id,
            normalized,
            resolved: HashMap::new(),
            writes: Vec::new(),
            synthesized: 0,
        }
    }

    /// Source line first, then a stored record, then a zero record.
    async fn performance(
        &mut self,
        store: &dyn Store,
        player_id: PlayerId,
    ) -> anyhow::Result<Option<(Player, PlayerPerformance)>> {
        if let Some(cached) = self.resolved.get(&player_id) {
            return Ok(cached.clone());
        }

        let resolved = match store.player(player_id).await? {
            None => None,
            Some(player) => {
                let from_source = self
                    .normalized
                    .and_then(|n| n.performance_for(&player, self.game_id));
                let performance = match from_source {
                    Some(performance) => {
                        self.writes.push(performance.clone());
                        performance
                    }
                    None => match store.performance(player_id, self.game_id).await? {
                        Some(stored) => stored,
                        None => {
                            info!(
                                player_id,
                                game_id = self.game_id,
                                "no stat line for player, synthesizing zero record"
                            );
                            let zero = PlayerPerformance::zero(player_id, self.game_id);
                            self.writes.push(zero.clone());
                            self.synthesized += 1;
                            zero
                        }
                    },
                };
                Some((player, performance))
            }
        };

        self.resolved.insert(player_id, resolved.clone());
        Ok(resolved)
    }

    fn into_writes(self) -> Vec<PlayerPerformance> {
        self.writes
    }
}
