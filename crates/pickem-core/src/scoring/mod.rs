// Fantasy point rules: goals, assists, goalie tiers, and team picks.
//
// Everything here is pure. Callers hand in a canonical performance plus the
// game context and get back either a number or a full breakdown of the terms
// that produced it.

pub mod overtime;

use serde::{Deserialize, Serialize};

use crate::model::{PickTarget, PlayerPerformance, Position};
pub use overtime::{
    ApproximateOvertimeAttribution, OvertimeAttribution, OvertimeAttributionKind,
    PlayByPlayOvertimeAttribution,
};

// ---------------------------------------------------------------------------
// Point values
// ---------------------------------------------------------------------------

pub const FORWARD_GOAL_POINTS: u32 = 2;
pub const FORWARD_OVERTIME_GOAL_POINTS: u32 = 7;
pub const DEFENSE_GOAL_POINTS: u32 = 3;
pub const DEFENSE_OVERTIME_GOAL_POINTS: u32 = 8;
pub const ASSIST_POINTS: u32 = 1;
pub const SHORTHANDED_MULTIPLIER: u32 = 2;

pub const GOALIE_SHUTOUT_POINTS: u32 = 5;
pub const GOALIE_LOW_SCORING_POINTS: u32 = 3;
/// Most goals a goalie can allow and still earn the low-scoring tier.
pub const GOALIE_LOW_SCORING_MAX_ALLOWED: u32 = 2;
pub const GOALIE_ASSIST_POINTS: u32 = 2;

/// A team pick scores nothing below this many goals, even in a win.
pub const TEAM_PICK_MIN_GOALS: u32 = 4;

// ---------------------------------------------------------------------------
// Context and events
// ---------------------------------------------------------------------------

/// Game-level facts the rules depend on, from our team's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameContext {
    pub is_overtime: bool,
    pub is_shootout: bool,
    /// Official final goals, including the shootout credit if we won one.
    pub team_goals: u32,
    pub opponent_goals: u32,
}

impl GameContext {
    pub fn team_won(&self) -> bool {
        self.team_goals > self.opponent_goals
    }

    /// True when a goal scored in overtime ended the game.
    pub fn decided_in_overtime(&self) -> bool {
        self.is_overtime && !self.is_shootout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalEvent {
    pub position: Position,
    pub is_overtime: bool,
    pub is_shorthanded: bool,
    pub is_empty_net: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistEvent {
    pub is_overtime: bool,
    pub is_shorthanded: bool,
}

// ---------------------------------------------------------------------------
// Individual rules
// ---------------------------------------------------------------------------

/// Points for one goal. The overtime base replaces the regulation base, then
/// a shorthanded goal doubles whatever base applies. Goalie goals score 0.
pub fn goal_points(goal: &GoalEvent) -> u32 {
    let base = match (goal.position, goal.is_overtime) {
        (Position::Forward, false) => FORWARD_GOAL_POINTS,
        (Position::Forward, true) => FORWARD_OVERTIME_GOAL_POINTS,
        (Position::Defense, false) => DEFENSE_GOAL_POINTS,
        (Position::Defense, true) => DEFENSE_OVERTIME_GOAL_POINTS,
        (Position::Goalie, _) => 0,
    };
    if goal.is_shorthanded {
        base * SHORTHANDED_MULTIPLIER
    } else {
        base
    }
}

/// Points for one skater assist. Overtime has no effect.
pub fn assist_points(assist: &AssistEvent) -> u32 {
    if assist.is_shorthanded {
        ASSIST_POINTS * SHORTHANDED_MULTIPLIER
    } else {
        ASSIST_POINTS
    }
}

/// Tier points for a goalie who allowed `goals_allowed` goals, already net of
/// empty-net and shootout goals.
pub fn goalie_tier_points(goals_allowed: u32) -> u32 {
    match goals_allowed {
        0 => GOALIE_SHUTOUT_POINTS,
        n if n <= GOALIE_LOW_SCORING_MAX_ALLOWED => GOALIE_LOW_SCORING_POINTS,
        _ => 0,
    }
}

/// Full goalie score: tier plus assists. `goals_against` of `None` means the
/// goalie did not play and earns no tier points.
pub fn goalie_points(goals_against: Option<u32>, empty_net_goals_against: u32, assists: u32) -> u32 {
    let tier = goals_against
        .map(|ga| goalie_tier_points(ga.saturating_sub(empty_net_goals_against)))
        .unwrap_or(0);
    tier + assists * GOALIE_ASSIST_POINTS
}

/// Team pick: nothing unless the team wins with at least four goals, then one
/// point per goal scored.
pub fn team_pick_points(team_goals: u32, opponent_goals: u32) -> u32 {
    if team_goals > opponent_goals && team_goals >= TEAM_PICK_MIN_GOALS {
        team_goals
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Expanding stat lines into events
// ---------------------------------------------------------------------------

/// Expand a skater's goal count into individual goal events.
///
/// Counts carry no ordering, so the expansion is fixed: shorthanded flags go to
/// the earliest goals and overtime flags to the latest.
pub fn goal_events(
    position: Position,
    performance: &PlayerPerformance,
    context: &GameContext,
    attribution: &dyn OvertimeAttribution,
) -> Vec<GoalEvent> {
    let total = performance.goals;
    let shorthanded = performance.shorthanded_goals.min(total);
    let overtime = attribution.overtime_goals(performance, context).min(total);
    (0..total)
        .map(|i| GoalEvent {
            position,
            is_overtime: i >= total - overtime,
            is_shorthanded: i < shorthanded,
            is_empty_net: false,
        })
        .collect()
}

pub fn assist_events(performance: &PlayerPerformance) -> Vec<AssistEvent> {
    let shorthanded = performance.shorthanded_assists();
    (0..performance.assists)
        .map(|i| AssistEvent {
            is_overtime: false,
            is_shorthanded: i < shorthanded,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Breakdowns
// ---------------------------------------------------------------------------

/// One line of a score explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaTerm {
    pub label: String,
    pub points: u32,
}

/// Every term that contributed to a score, plus the total.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub terms: Vec<FormulaTerm>,
    pub total: u32,
}

impl ScoreBreakdown {
    fn push(&mut self, label: impl Into<String>, points: u32) {
        self.terms.push(FormulaTerm {
            label: label.into(),
            points,
        });
        self.total += points;
    }
}

fn position_word(position: Position) -> &'static str {
    match position {
        Position::Forward => "forward",
        Position::Defense => "defenseman",
        Position::Goalie => "goalie",
    }
}

/// Score one player's game and explain it.
pub fn score_performance(
    position: Position,
    performance: &PlayerPerformance,
    context: &GameContext,
    attribution: &dyn OvertimeAttribution,
) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown::default();

    if position == Position::Goalie {
        let empty_net = performance.empty_net_goals_against;
        let tier = goalie_points(performance.goals_against, empty_net, 0);
        let label = match performance.goals_against {
            Some(ga) if empty_net > 0 => format!(
                "goalie allowed {} (net of {empty_net} empty-net)",
                ga.saturating_sub(empty_net)
            ),
            Some(ga) => format!("goalie allowed {ga}"),
            None => "goalie did not play".to_string(),
        };
        breakdown.push(label, tier);
        for i in 0..performance.assists {
            breakdown.push(format!("goalie assist {}", i + 1), goalie_points(None, 0, 1));
        }
        return breakdown;
    }

    for (i, goal) in goal_events(position, performance, context, attribution)
        .iter()
        .enumerate()
    {
        let mut label = format!("goal {} ({}", i + 1, position_word(position));
        if goal.is_overtime {
            label.push_str(", overtime-deciding");
        }
        if goal.is_shorthanded {
            label.push_str(", shorthanded");
        }
        label.push(')');
        breakdown.push(label, goal_points(goal));
    }
    for (i, assist) in assist_events(performance).iter().enumerate() {
        let label = if assist.is_shorthanded {
            format!("assist {} (shorthanded)", i + 1)
        } else {
            format!("assist {}", i + 1)
        };
        breakdown.push(label, assist_points(assist));
    }
    breakdown
}

/// Score a team pick from the final score and explain it.
pub fn score_team(team_goals: u32, opponent_goals: u32) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown::default();
    let points = team_pick_points(team_goals, opponent_goals);
    let label = if team_goals <= opponent_goals {
        format!("team did not win {team_goals}-{opponent_goals}")
    } else if team_goals < TEAM_PICK_MIN_GOALS {
        format!("team won {team_goals}-{opponent_goals} with fewer than {TEAM_PICK_MIN_GOALS} goals")
    } else {
        format!("team won {team_goals}-{opponent_goals}, one point per goal")
    };
    breakdown.push(label, points);
    breakdown
}

/// What a pick needs in order to be scored.
pub enum PickInput<'a> {
    Player {
        position: Position,
        performance: &'a PlayerPerformance,
    },
    Team {
        team_goals: u32,
        opponent_goals: u32,
    },
}

/// Dispatch a pick to the right formula. The match is exhaustive over the
/// pick kinds, so a new kind cannot slip through unscored.
pub fn score_pick(
    input: PickInput<'_>,
    context: &GameContext,
    attribution: &dyn OvertimeAttribution,
) -> ScoreBreakdown {
    match input {
        PickInput::Player {
            position,
            performance,
        } => score_performance(position, performance, context, attribution),
        PickInput::Team {
            team_goals,
            opponent_goals,
        } => score_team(team_goals, opponent_goals),
    }
}

/// Short label used in logs and reports.
pub fn describe_target(target: &PickTarget) -> String {
    match target {
        PickTarget::Player { player_name, .. } => format!("player pick ({player_name})"),
        PickTarget::Team => "team pick".to_string(),
    }
}
