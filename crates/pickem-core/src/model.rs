// Domain records: players, games, performances, picks, and league memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scoring::GameContext;

pub type PlayerId = i64;
pub type GameId = i64;
pub type LeagueId = i64;
pub type UserId = i64;
pub type PickId = i64;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Hockey positions as far as scoring is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Forward,
    Defense,
    Goalie,
}

impl Position {
    /// Parse an upstream position code.
    ///
    /// Centers and wingers (`C`, `L`, `R`, and the generic `F`) all score as
    /// forwards. Codes are matched case-insensitively.
    pub fn from_str_pos(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "C" | "L" | "R" | "LW" | "RW" | "F" => Some(Position::Forward),
            "D" => Some(Position::Defense),
            "G" => Some(Position::Goalie),
            _ => None,
        }
    }

    /// Return the single-letter code stored in the database.
    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Forward => "F",
            Position::Defense => "D",
            Position::Goalie => "G",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}

/// A rostered player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub jersey_number: Option<u8>,
    pub position: Position,
    pub active: bool,
    /// Upstream player id used to match box-score lines.
    pub external_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// Lifecycle of a real-world game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
}

impl GameStatus {
    /// Map an upstream game-state code (`FUT`, `LIVE`, `OFF`, ...) to a status.
    pub fn from_upstream(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "FUT" | "PRE" | "SCHEDULED" | "PREVIEW" => Some(GameStatus::Scheduled),
            "LIVE" | "CRIT" | "IN_PROGRESS" => Some(GameStatus::InProgress),
            "FINAL" | "OFF" => Some(GameStatus::Final),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(GameStatus::Scheduled),
            "in_progress" => Some(GameStatus::InProgress),
            "final" => Some(GameStatus::Final),
            _ => None,
        }
    }

    /// Apply an observed status without ever moving a final game backwards.
    pub fn advance_to(self, observed: GameStatus) -> GameStatus {
        if self == GameStatus::Final {
            GameStatus::Final
        } else {
            observed
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single game on our team's schedule.
///
/// Scores are stored from our team's point of view: `team_score` is ours,
/// `opponent_score` is theirs, whichever side of the ice we were on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub opponent: String,
    pub is_home: bool,
    pub start_time: DateTime<Utc>,
    pub status: GameStatus,
    pub team_score: Option<u32>,
    pub opponent_score: Option<u32>,
    pub external_id: Option<i64>,
    /// Set exactly once, when settlement commits.
    pub settled_at: Option<DateTime<Utc>>,
    pub settlement_run: Option<String>,
    /// How the game ended, recorded at settlement for later audits.
    pub went_to_overtime: bool,
    pub went_to_shootout: bool,
}

impl Game {
    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    /// Final score as (ours, theirs), if both halves are known.
    pub fn final_score(&self) -> Option<(u32, u32)> {
        Some((self.team_score?, self.opponent_score?))
    }

    /// Scoring context rebuilt from the stored row, once the score is known.
    pub fn context(&self) -> Option<GameContext> {
        let (team_goals, opponent_goals) = self.final_score()?;
        Some(GameContext {
            is_overtime: self.went_to_overtime,
            is_shootout: self.went_to_shootout,
            team_goals,
            opponent_goals,
        })
    }
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Canonical per-(player, game) stat line the scoring engine consumes.
///
/// Goalie fields stay `None`/zero for skaters. `goals_against` is `None` for a
/// goalie who did not play, which scores no tier points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPerformance {
    pub player_id: PlayerId,
    pub game_id: GameId,
    pub goals: u32,
    pub assists: u32,
    pub shorthanded_goals: u32,
    pub shorthanded_points: u32,
    pub power_play_goals: u32,
    pub power_play_points: u32,
    /// Exact overtime goal count when the source had per-goal data.
    pub overtime_goals: Option<u32>,
    pub goals_against: Option<u32>,
    pub empty_net_goals_against: u32,
    /// True for a zero-stat placeholder written when the source had no line.
    pub synthesized: bool,
}

impl PlayerPerformance {
    /// The zero-stat placeholder for a player the source did not report.
    ///
    /// Always identical for the same (player, game), so writing it twice is a
    /// no-op under upsert.
    pub fn zero(player_id: PlayerId, game_id: GameId) -> Self {
        PlayerPerformance {
            player_id,
            game_id,
            synthesized: true,
            ..Default::default()
        }
    }

    /// Shorthanded assists derived from the shorthanded point count.
    pub fn shorthanded_assists(&self) -> u32 {
        self.shorthanded_points
            .saturating_sub(self.shorthanded_goals)
            .min(self.assists)
    }
}

// ---------------------------------------------------------------------------
// Picks
// ---------------------------------------------------------------------------

/// What a pick selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pick_type", rename_all = "snake_case")]
pub enum PickTarget {
    Player {
        player_id: PlayerId,
        /// Name snapshot taken when the pick was made.
        player_name: String,
    },
    Team,
}

impl PickTarget {
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            PickTarget::Player { player_id, .. } => Some(*player_id),
            PickTarget::Team => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PickTarget::Player { .. } => "player",
            PickTarget::Team => "team",
        }
    }
}

impl fmt::Display for PickTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickTarget::Player { player_name, .. } => f.write_str(player_name),
            PickTarget::Team => f.write_str("the team"),
        }
    }
}

/// One member's pick for one game in one league.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub id: PickId,
    pub user_id: UserId,
    pub league_id: LeagueId,
    pub game_id: GameId,
    pub target: PickTarget,
    pub points_earned: u32,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pick {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Memberships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

/// A user's membership in a league, carrying their cumulative standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueMembership {
    pub league_id: LeagueId,
    pub user_id: UserId,
    pub role: Role,
    pub draft_position: Option<u32>,
    pub total_points: i64,
}

impl LeagueMembership {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
