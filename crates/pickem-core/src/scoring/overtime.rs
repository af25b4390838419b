// Overtime-goal attribution policies.
//
// Box scores report goal counts, not which goal ended the game. A policy
// decides how many of a player's goals were the overtime decider so the rest
// of the engine never has to care where that answer came from.

use serde::Deserialize;
use std::fmt;

use super::GameContext;
use crate::model::PlayerPerformance;

/// Decides how many of a player's goals decided the game in overtime.
pub trait OvertimeAttribution: Send + Sync + fmt::Debug {
    /// Number of overtime-deciding goals in this player's tally. Never more
    /// than `performance.goals`.
    fn overtime_goals(&self, performance: &PlayerPerformance, context: &GameContext) -> u32;
}

/// Last-goal heuristic: in a game our team won in overtime (not a shootout),
/// the final goal of every player who scored is treated as the decider.
///
/// This is lossy when several of our players scored, since only one of them
/// actually ended the game.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateOvertimeAttribution;

impl OvertimeAttribution for ApproximateOvertimeAttribution {
    fn overtime_goals(&self, performance: &PlayerPerformance, context: &GameContext) -> u32 {
        if context.decided_in_overtime() && context.team_won() && performance.goals > 0 {
            1
        } else {
            0
        }
    }
}

/// Uses the exact overtime goal count the normalizer pulled from per-goal
/// data, falling back to the last-goal heuristic when none was available.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayByPlayOvertimeAttribution;

impl OvertimeAttribution for PlayByPlayOvertimeAttribution {
    fn overtime_goals(&self, performance: &PlayerPerformance, context: &GameContext) -> u32 {
        match performance.overtime_goals {
            Some(_) if !context.decided_in_overtime() => 0,
            Some(n) => n.min(performance.goals),
            None => ApproximateOvertimeAttribution.overtime_goals(performance, context),
        }
    }
}

/// Config-facing selector for the attribution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OvertimeAttributionKind {
    Approximate,
    #[default]
    PlayByPlay,
}

impl OvertimeAttributionKind {
    pub fn build(self) -> Box<dyn OvertimeAttribution> {
        match self {
            OvertimeAttributionKind::Approximate => Box::new(ApproximateOvertimeAttribution),
            OvertimeAttributionKind::PlayByPlay => Box::new(PlayByPlayOvertimeAttribution),
        }
    }
}
