// Status refresh: pull game state from upstream and lock picks when due.
//
// Both operations are idempotent; an external trigger may call them as often
// as it likes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{Game, GameId, GameStatus};
use crate::normalize::Side;
use crate::source::{GameDataSource, SourceError};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("game {0} does not exist")]
    UnknownGame(GameId),

    #[error("upstream data error: {0}")]
    Upstream(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What one refresh observed and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub game_id: GameId,
    pub status: GameStatus,
    pub team_score: Option<u32>,
    pub opponent_score: Option<u32>,
    /// Picks newly stamped locked by this refresh.
    pub locked: usize,
}

pub struct StatusRefresher {
    store: Arc<dyn Store>,
    source: Arc<dyn GameDataSource>,
}

impl StatusRefresher {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn GameDataSource>) -> Self {
        StatusRefresher { store, source }
    }

    /// Fetch the game's status and score and record them from our side.
    ///
    /// A final game never moves back, and picks lock once the game is no
    /// longer scheduled or its start time has passed. Settled games are
    /// returned as stored without contacting the source.
    pub async fn refresh_game(
        &self,
        game_id: GameId,
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome, RefreshError> {
        let game = self
            .store
            .game(game_id)
            .await?
            .ok_or(RefreshError::UnknownGame(game_id))?;
        if game.is_settled() {
            debug!(game_id, "game already settled, refresh skipped");
            return Ok(RefreshOutcome {
                game_id,
                status: game.status,
                team_score: game.team_score,
                opponent_score: game.opponent_score,
                locked: 0,
            });
        }

        let game_ref = game.external_id.unwrap_or(game.id);
        let state = self.source.fetch_game_state(game_ref).await?;
        let (team_score, opponent_score) =
            Side::from_is_home(game.is_home).split(state.home_score, state.away_score);
        let status = game.status.advance_to(state.status);

        self.store
            .update_game_state(game_id, status, team_score, opponent_score)
            .await?;
        if status != game.status {
            info!(game_id, from = %game.status, to = %status, "game status changed");
        }

        let locked = if lock_due(&game, status, now) {
            self.store.lock_picks(game_id, None, now).await?
        } else {
            0
        };
        if locked > 0 {
            info!(game_id, locked, "picks locked");
        }

        Ok(RefreshOutcome {
            game_id,
            status,
            team_score: team_score.or(game.team_score),
            opponent_score: opponent_score.or(game.opponent_score),
            locked,
        })
    }

    /// Refresh every unsettled game that is due to have started. Failures for
    /// one game are logged and do not stop the others.
    pub async fn refresh_started(&self, now: DateTime<Utc>) -> Result<Vec<RefreshOutcome>, RefreshError> {
        let mut outcomes = Vec::new();
        for game in self.store.unsettled_games().await? {
            if game.start_time > now && game.status == GameStatus::Scheduled {
                continue;
            }
            match self.refresh_game(game.id, now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(RefreshError::Store(e)) => return Err(RefreshError::Store(e)),
                Err(e) => warn!(game_id = game.id, error = %e, "refresh failed"),
            }
        }
        Ok(outcomes)
    }

    /// Stamp `locked_at` on picks of every unsettled game whose start time
    /// has passed. Returns the number of picks newly locked.
    pub async fn lock_due_games(&self, now: DateTime<Utc>) -> Result<usize, RefreshError> {
        let mut total = 0;
        for game in self.store.unsettled_games().await? {
            if !lock_due(&game, game.status, now) {
                continue;
            }
            let locked = self.store.lock_picks(game.id, None, now).await?;
            if locked > 0 {
                info!(game_id = game.id, locked, "picks locked at start time");
            }
            total += locked;
        }
        Ok(total)
    }
}

fn lock_due(game: &Game, status: GameStatus, now: DateTime<Utc>) -> bool {
    status != GameStatus::Scheduled || now >= game.start_time
}
