// Gamecenter box-score shape (`/v1/gamecenter/{id}/boxscore`), optionally
// merged with the landing page's scoring summary for per-goal detail.

use std::collections::HashMap;

use serde::Deserialize;

use super::{
    opponent_goals_excluding_shootout, toi_seconds, GoalieLine, NormalizedBoxScore, SkaterLine,
    Side,
};
use crate::model::GameStatus;
use crate::scoring::GameContext;

const PERIOD_OVERTIME: &str = "OT";
const PERIOD_SHOOTOUT: &str = "SO";
const STRENGTH_SHORTHANDED: &str = "sh";
const STRENGTH_POWER_PLAY: &str = "pp";
const MODIFIER_EMPTY_NET: &str = "empty-net";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamecenterBoxScore {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub game_state: Option<String>,
    pub home_team: TeamScore,
    pub away_team: TeamScore,
    #[serde(default)]
    pub period_descriptor: Option<PeriodDescriptor>,
    #[serde(default)]
    pub game_outcome: Option<GameOutcome>,
    pub player_by_game_stats: PlayerByGameStats,
    /// Scoring summary from the landing endpoint, when the client merged it in.
    #[serde(default)]
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TeamScore {
    #[serde(default)]
    pub abbrev: Option<String>,
    #[serde(default)]
    pub score: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodDescriptor {
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub period_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOutcome {
    pub last_period_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerByGameStats {
    #[serde(default)]
    pub home_team: SideStats,
    #[serde(default)]
    pub away_team: SideStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SideStats {
    #[serde(default)]
    pub forwards: Vec<SkaterStats>,
    #[serde(default)]
    pub defense: Vec<SkaterStats>,
    #[serde(default)]
    pub goalies: Vec<GoalieStats>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkaterStats {
    pub player_id: i64,
    #[serde(default)]
    pub goals: u32,
    #[serde(default)]
    pub assists: u32,
    #[serde(default)]
    pub power_play_goals: u32,
    #[serde(default)]
    pub power_play_points: Option<u32>,
    #[serde(default)]
    pub shorthanded_goals: Option<u32>,
    #[serde(default)]
    pub sh_points: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalieStats {
    pub player_id: i64,
    #[serde(default)]
    pub goals_against: Option<u32>,
    #[serde(default)]
    pub toi: Option<String>,
    #[serde(default)]
    pub assists: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub scoring: Vec<ScoringPeriod>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringPeriod {
    pub period_descriptor: PeriodDescriptor,
    #[serde(default)]
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub player_id: i64,
    #[serde(default)]
    pub strength: String,
    #[serde(default)]
    pub goal_modifier: String,
    pub is_home: bool,
    #[serde(default)]
    pub assists: Vec<GoalAssist>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalAssist {
    pub player_id: i64,
}

/// Per-player counts pulled out of the scoring summary for our side.
#[derive(Debug, Default)]
struct SummaryTally {
    overtime_goals: HashMap<i64, u32>,
    shorthanded_goals: HashMap<i64, u32>,
    shorthanded_assists: HashMap<i64, u32>,
    power_play_points: HashMap<i64, u32>,
    assists: HashMap<i64, u32>,
    empty_net_against: u32,
}

fn bump(map: &mut HashMap<i64, u32>, id: i64) {
    *map.entry(id).or_insert(0) += 1;
}

fn count(map: &HashMap<i64, u32>, id: i64) -> u32 {
    map.get(&id).copied().unwrap_or(0)
}

impl SummaryTally {
    fn from_summary(summary: &Summary, side: Side) -> Self {
        let mut tally = SummaryTally::default();
        for period in &summary.scoring {
            // Shootout attempts are never goals for or against anyone.
            if period.period_descriptor.period_type == PERIOD_SHOOTOUT {
                continue;
            }
            let in_overtime = period.period_descriptor.period_type == PERIOD_OVERTIME;
            for goal in &period.goals {
                let ours = goal.is_home == (side == Side::Home);
                if !ours {
                    if goal.goal_modifier == MODIFIER_EMPTY_NET {
                        tally.empty_net_against += 1;
                    }
                    continue;
                }
                if in_overtime {
                    bump(&mut tally.overtime_goals, goal.player_id);
                }
                match goal.strength.as_str() {
                    STRENGTH_SHORTHANDED => {
                        bump(&mut tally.shorthanded_goals, goal.player_id);
                        for a in &goal.assists {
                            bump(&mut tally.shorthanded_assists, a.player_id);
                        }
                    }
                    STRENGTH_POWER_PLAY => {
                        bump(&mut tally.power_play_points, goal.player_id);
                        for a in &goal.assists {
                            bump(&mut tally.power_play_points, a.player_id);
                        }
                    }
                    _ => {}
                }
                for a in &goal.assists {
                    bump(&mut tally.assists, a.player_id);
                }
            }
        }
        tally
    }
}

impl GamecenterBoxScore {
    pub fn status(&self) -> Option<GameStatus> {
        self.game_state.as_deref().and_then(GameStatus::from_upstream)
    }

    pub fn scores(&self) -> Option<(u32, u32)> {
        Some((self.home_team.score?, self.away_team.score?))
    }

    fn last_period_type(&self) -> &str {
        self.game_outcome
            .as_ref()
            .map(|o| o.last_period_type.as_str())
            .or_else(|| {
                self.period_descriptor
                    .as_ref()
                    .map(|p| p.period_type.as_str())
            })
            .unwrap_or("REG")
    }

    /// Overtime and shootout flags come from the game state itself, never from
    /// the absence of shootout data.
    pub fn context(&self, side: Side) -> GameContext {
        let last = self.last_period_type();
        let summary_shootout = self.summary.as_ref().is_some_and(|s| {
            s.scoring
                .iter()
                .any(|p| p.period_descriptor.period_type == PERIOD_SHOOTOUT)
        });
        let is_shootout = last == PERIOD_SHOOTOUT || summary_shootout;
        let is_overtime = last == PERIOD_OVERTIME || is_shootout;
        let (team_goals, opponent_goals) = side.split(
            self.home_team.score.unwrap_or(0),
            self.away_team.score.unwrap_or(0),
        );
        GameContext {
            is_overtime,
            is_shootout,
            team_goals,
            opponent_goals,
        }
    }

    pub fn normalize(&self, side: Side) -> NormalizedBoxScore {
        let context = self.context(side);
        let (stats, _) = side.split(
            &self.player_by_game_stats.home_team,
            &self.player_by_game_stats.away_team,
        );
        let tally = self
            .summary
            .as_ref()
            .map(|s| SummaryTally::from_summary(s, side));

        let mut normalized = NormalizedBoxScore {
            context,
            ..Default::default()
        };

        for sk in stats.forwards.iter().chain(stats.defense.iter()) {
            let id = sk.player_id;
            let shorthanded_goals = sk
                .shorthanded_goals
                .or_else(|| tally.as_ref().map(|t| count(&t.shorthanded_goals, id)))
                .unwrap_or(0);
            let shorthanded_points = sk
                .sh_points
                .or_else(|| {
                    tally
                        .as_ref()
                        .map(|t| count(&t.shorthanded_goals, id) + count(&t.shorthanded_assists, id))
                })
                .unwrap_or(shorthanded_goals);
            let power_play_points = sk
                .power_play_points
                .or_else(|| tally.as_ref().map(|t| count(&t.power_play_points, id)))
                .unwrap_or(sk.power_play_goals);
            normalized.skaters.insert(
                id,
                SkaterLine {
                    goals: sk.goals,
                    assists: sk.assists,
                    shorthanded_goals,
                    shorthanded_points,
                    power_play_goals: sk.power_play_goals,
                    power_play_points,
                    overtime_goals: tally.as_ref().map(|t| count(&t.overtime_goals, id)),
                },
            );
        }

        let allowed_cap = opponent_goals_excluding_shootout(&context);
        let empty_net_against = tally.as_ref().map(|t| t.empty_net_against).unwrap_or(0);
        for g in &stats.goalies {
            let played = match g.toi.as_deref().and_then(toi_seconds) {
                Some(secs) => secs > 0,
                None => g.goals_against.is_some(),
            };
            // A goalie's own figure already leaves out empty-net goals. Only the
            // team-level fallback needs them subtracted during scoring. The
            // summary does not say who was in net, so without per-goalie
            // figures every goalie who played is charged the full total.
            let (goals_against, empty_net_goals_against) = match (played, g.goals_against) {
                (false, _) => (None, 0),
                (true, Some(ga)) => (Some(ga.min(allowed_cap)), 0),
                (true, None) => (Some(allowed_cap), empty_net_against.min(allowed_cap)),
            };
            let assists = g
                .assists
                .or_else(|| tally.as_ref().map(|t| count(&t.assists, g.player_id)))
                .unwrap_or(0);
            normalized.goalies.insert(
                g.player_id,
                GoalieLine {
                    goals_against,
                    empty_net_goals_against,
                    assists,
                },
            );
        }

        normalized
    }
}
