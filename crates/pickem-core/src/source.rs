// Upstream game-data source contract.
//
// Retries and backoff belong to implementations; the pipeline calls each
// method once and treats failure as final for that invocation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::GameStatus;
use crate::normalize::RawBoxScore;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("game {0} not found upstream")]
    NotFound(i64),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("could not decode upstream payload: {0}")]
    Decode(String),
}

/// Status and official score as the source reports them, home/away oriented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamGameState {
    pub status: GameStatus,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

#[async_trait]
pub trait GameDataSource: Send + Sync {
    async fn fetch_box_score(&self, game_ref: i64) -> Result<RawBoxScore, SourceError>;
    async fn fetch_game_state(&self, game_ref: i64) -> Result<UpstreamGameState, SourceError>;
}

/// In-memory source serving pre-loaded payloads. Used for offline replays and
/// tests. Unknown game refs report `NotFound`.
#[derive(Debug, Default)]
pub struct StaticSource {
    box_scores: Mutex<HashMap<i64, RawBoxScore>>,
    states: Mutex<HashMap<i64, UpstreamGameState>>,
    unavailable: bool,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose every call fails as if the upstream were down.
    pub fn unavailable() -> Self {
        StaticSource {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn with_box_score(self, game_ref: i64, box_score: RawBoxScore) -> Self {
        self.insert_box_score(game_ref, box_score);
        self
    }

    pub fn with_game_state(self, game_ref: i64, state: UpstreamGameState) -> Self {
        if let Ok(mut states) = self.states.lock() {
            states.insert(game_ref, state);
        }
        self
    }

    pub fn insert_box_score(&self, game_ref: i64, box_score: RawBoxScore) {
        if let Ok(mut box_scores) = self.box_scores.lock() {
            box_scores.insert(game_ref, box_score);
        }
    }
}

#[async_trait]
impl GameDataSource for StaticSource {
    async fn fetch_box_score(&self, game_ref: i64) -> Result<RawBoxScore, SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable("static source marked unavailable".into()));
        }
        let box_scores = self
            .box_scores
            .lock()
            .map_err(|_| SourceError::Unavailable("box score cache poisoned".into()))?;
        box_scores
            .get(&game_ref)
            .cloned()
            .ok_or(SourceError::NotFound(game_ref))
    }

    async fn fetch_game_state(&self, game_ref: i64) -> Result<UpstreamGameState, SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable("static source marked unavailable".into()));
        }
        let cached = self
            .states
            .lock()
            .map_err(|_| SourceError::Unavailable("game state cache poisoned".into()))?
            .get(&game_ref)
            .copied();
        if let Some(state) = cached {
            return Ok(state);
        }
        // Fall back to whatever the box score itself says.
        let raw = self.fetch_box_score(game_ref).await?;
        let status = raw
            .status()
            .ok_or_else(|| SourceError::Decode(format!("box score for {game_ref} has no game state")))?;
        let (home_score, away_score) = match raw.scores() {
            Some((h, a)) => (Some(h), Some(a)),
            None => (None, None),
        };
        Ok(UpstreamGameState {
            status,
            home_score,
            away_score,
        })
    }
}
