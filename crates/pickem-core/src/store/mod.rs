// Record store contract and its SQLite implementation.
//
// The uniqueness rules here carry correctness: one pick per
// (user, league, game), one performance per (player, game). Any substitute
// store must keep them.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    Game, GameId, GameStatus, LeagueId, LeagueMembership, Pick, PickId, PickTarget, Player,
    PlayerId, PlayerPerformance, Position, Role, UserId,
};
use crate::scoring::GameContext;

pub use sqlite::SqliteStore;

/// Whether an upsert created a row or updated the existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Player fields supplied by roster sync. Upserted by `external_id` when present.
#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub name: String,
    pub jersey_number: Option<u8>,
    pub position: Position,
    pub active: bool,
    pub external_id: Option<i64>,
}

/// Schedule entry supplied by schedule sync. Upserted by `external_id` when present.
#[derive(Debug, Clone)]
pub struct NewGame {
    pub opponent: String,
    pub is_home: bool,
    pub start_time: DateTime<Utc>,
    pub external_id: Option<i64>,
}

/// A pick write. `locked_at` only applies when the row is created; an existing
/// lock is never cleared by an update.
#[derive(Debug, Clone)]
pub struct NewPick {
    pub user_id: UserId,
    pub league_id: LeagueId,
    pub game_id: GameId,
    pub target: PickTarget,
    pub locked_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickPoints {
    pub pick_id: PickId,
    pub points: u32,
}

/// Points to add to one member's running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StandingDelta {
    pub league_id: LeagueId,
    pub user_id: UserId,
    pub points: i64,
}

/// Everything a settlement run writes, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct SettlementCommit {
    pub game_id: GameId,
    pub run_id: String,
    pub settled_at: DateTime<Utc>,
    /// How the game ended; stored on the game row with the claim.
    pub context: GameContext,
    /// Final score from the box score, written only where the status
    /// refresh never recorded one.
    pub final_score: Option<(u32, u32)>,
    pub performances: Vec<PlayerPerformance>,
    pub pick_points: Vec<PickPoints>,
    pub deltas: Vec<StandingDelta>,
}

/// Transactional record store used by the pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_player(&self, player: &NewPlayer) -> Result<PlayerId>;
    async fn player(&self, id: PlayerId) -> Result<Option<Player>>;

    async fn upsert_game(&self, game: &NewGame) -> Result<GameId>;
    async fn game(&self, id: GameId) -> Result<Option<Game>>;
    async fn unsettled_games(&self) -> Result<Vec<Game>>;
    /// Record an observed status and score. A final game stays final.
    async fn update_game_state(
        &self,
        id: GameId,
        status: GameStatus,
        team_score: Option<u32>,
        opponent_score: Option<u32>,
    ) -> Result<()>;

    async fn add_membership(&self, league_id: LeagueId, user_id: UserId, role: Role) -> Result<()>;
    async fn membership(&self, league_id: LeagueId, user_id: UserId)
        -> Result<Option<LeagueMembership>>;
    async fn memberships(&self, league_id: LeagueId) -> Result<Vec<LeagueMembership>>;
    /// Reassign every listed member's draft position in one transaction.
    async fn set_draft_positions(
        &self,
        league_id: LeagueId,
        positions: &[(UserId, Option<u32>)],
    ) -> Result<()>;

    async fn pick(&self, id: PickId) -> Result<Option<Pick>>;
    async fn find_pick(&self, user_id: UserId, league_id: LeagueId, game_id: GameId)
        -> Result<Option<Pick>>;
    async fn picks_for_game(&self, game_id: GameId) -> Result<Vec<Pick>>;
    async fn picks_for_league_game(&self, league_id: LeagueId, game_id: GameId)
        -> Result<Vec<Pick>>;
    async fn upsert_pick(&self, pick: &NewPick) -> Result<(Pick, UpsertOutcome)>;
    /// Stamp `locked_at` on every unlocked pick for the game, optionally
    /// restricted to one league. Returns how many picks were newly locked.
    async fn lock_picks(
        &self,
        game_id: GameId,
        league_id: Option<LeagueId>,
        at: DateTime<Utc>,
    ) -> Result<usize>;

    async fn upsert_performance(&self, performance: &PlayerPerformance) -> Result<()>;
    async fn performance(&self, player_id: PlayerId, game_id: GameId)
        -> Result<Option<PlayerPerformance>>;

    /// Claim the game for settlement and apply every write in `commit`.
    ///
    /// The claim is a conditional update on `settled_at IS NULL`; returns
    /// `false` (writing nothing) if another run already settled the game.
    async fn commit_settlement(&self, commit: &SettlementCommit) -> Result<bool>;
}
