// Open/locked/settled state of a (league, game) pick window.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Game, GameStatus, Pick};

/// Why a pick window stopped accepting member picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Every league member has a pick for the game.
    AllPicked,
    /// The scheduled start time has passed.
    Started,
    /// The upstream no longer reports the game as scheduled.
    StatusChanged,
    /// Picks were stamped locked earlier and stay locked.
    PicksLocked,
    Settled,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LockReason::AllPicked => "every member has already picked",
            LockReason::Started => "the game has started",
            LockReason::StatusChanged => "the game is no longer scheduled",
            LockReason::PicksLocked => "picks for this game are locked",
            LockReason::Settled => "the game has been settled",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LockState {
    Open,
    Locked(LockReason),
    Settled,
}

impl LockState {
    pub fn is_open(&self) -> bool {
        matches!(self, LockState::Open)
    }

    /// Reason to report when a submission is refused in this state.
    pub fn reason(&self) -> Option<LockReason> {
        match self {
            LockState::Open => None,
            LockState::Locked(reason) => Some(*reason),
            LockState::Settled => Some(LockReason::Settled),
        }
    }
}

/// Snapshot of one league's picks for one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickWindow {
    pub state: LockState,
    pub picks_made: usize,
    pub members: usize,
}

impl PickWindow {
    pub fn evaluate(game: &Game, picks: &[Pick], members: usize, now: DateTime<Utc>) -> Self {
        PickWindow {
            state: lock_state(game, picks, members, now),
            picks_made: picks.len(),
            members,
        }
    }
}

/// Settled wins over every lock reason; a status change wins over the clock.
pub fn lock_state(game: &Game, picks: &[Pick], members: usize, now: DateTime<Utc>) -> LockState {
    if game.is_settled() {
        LockState::Settled
    } else if game.status != GameStatus::Scheduled {
        LockState::Locked(LockReason::StatusChanged)
    } else if now >= game.start_time {
        LockState::Locked(LockReason::Started)
    } else if members > 0 && picks.len() >= members {
        LockState::Locked(LockReason::AllPicked)
    } else if picks.iter().any(Pick::is_locked) {
        LockState::Locked(LockReason::PicksLocked)
    } else {
        LockState::Open
    }
}
