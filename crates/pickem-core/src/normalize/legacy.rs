// Legacy stats-API box-score shape: players keyed "ID<number>" under each
// team, with separate skater and goalie stat blocks and an optional linescore.

use std::collections::HashMap;

use serde::Deserialize;

use super::{
    opponent_goals_excluding_shootout, toi_seconds, GoalieLine, NormalizedBoxScore, SkaterLine,
    Side,
};
use crate::model::GameStatus;
use crate::scoring::GameContext;

/// Regulation length in periods.
const REGULATION_PERIODS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyBoxScore {
    pub teams: LegacyTeams,
    #[serde(default)]
    pub linescore: Option<Linescore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyTeams {
    pub home: LegacyTeam,
    pub away: LegacyTeam,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTeam {
    #[serde(default)]
    pub team_stats: Option<TeamStats>,
    #[serde(default)]
    pub players: HashMap<String, LegacyPlayer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    #[serde(default)]
    pub team_skater_stats: Option<TeamSkaterStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamSkaterStats {
    #[serde(default)]
    pub goals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyPlayer {
    pub person: Person,
    #[serde(default)]
    pub stats: PlayerStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Person {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    #[serde(default)]
    pub skater_stats: Option<SkaterStats>,
    #[serde(default)]
    pub goalie_stats: Option<GoalieStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkaterStats {
    #[serde(default)]
    pub goals: u32,
    #[serde(default)]
    pub assists: u32,
    #[serde(default)]
    pub short_handed_goals: u32,
    #[serde(default)]
    pub short_handed_assists: u32,
    #[serde(default)]
    pub power_play_goals: u32,
    #[serde(default)]
    pub power_play_assists: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalieStats {
    #[serde(default)]
    pub time_on_ice: Option<String>,
    #[serde(default)]
    pub assists: u32,
    #[serde(default)]
    pub shots: u32,
    #[serde(default)]
    pub saves: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linescore {
    #[serde(default)]
    pub current_period: u32,
    #[serde(default)]
    pub current_period_time_remaining: Option<String>,
    #[serde(default)]
    pub has_shootout: bool,
    #[serde(default)]
    pub teams: Option<LinescoreTeams>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinescoreTeams {
    pub home: LinescoreTeam,
    pub away: LinescoreTeam,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinescoreTeam {
    #[serde(default)]
    pub goals: u32,
}

impl LegacyBoxScore {
    pub fn status(&self) -> Option<GameStatus> {
        let linescore = self.linescore.as_ref()?;
        if linescore
            .current_period_time_remaining
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("final"))
        {
            Some(GameStatus::Final)
        } else if linescore.current_period > 0 {
            Some(GameStatus::InProgress)
        } else {
            Some(GameStatus::Scheduled)
        }
    }

    /// Official (home, away) goals, preferring the linescore.
    pub fn scores(&self) -> Option<(u32, u32)> {
        if let Some(teams) = self.linescore.as_ref().and_then(|l| l.teams.as_ref()) {
            return Some((teams.home.goals, teams.away.goals));
        }
        let goals = |t: &LegacyTeam| {
            t.team_stats
                .as_ref()
                .and_then(|s| s.team_skater_stats.as_ref())
                .map(|s| s.goals)
        };
        Some((goals(&self.teams.home)?, goals(&self.teams.away)?))
    }

    pub fn context(&self, side: Side) -> GameContext {
        let (home, away) = self.scores().unwrap_or((0, 0));
        let (team_goals, opponent_goals) = side.split(home, away);
        let (is_overtime, is_shootout) = match &self.linescore {
            Some(l) => (
                l.current_period > REGULATION_PERIODS || l.has_shootout,
                l.has_shootout,
            ),
            None => (false, false),
        };
        GameContext {
            is_overtime,
            is_shootout,
            team_goals,
            opponent_goals,
        }
    }

    pub fn normalize(&self, side: Side) -> NormalizedBoxScore {
        let context = self.context(side);
        let (team, _) = side.split(&self.teams.home, &self.teams.away);
        let allowed_cap = opponent_goals_excluding_shootout(&context);

        let mut normalized = NormalizedBoxScore {
            context,
            ..Default::default()
        };

        for player in team.players.values() {
            let id = player.person.id;
            if let Some(g) = &player.stats.goalie_stats {
                let played = match g.time_on_ice.as_deref().and_then(toi_seconds) {
                    Some(secs) => secs > 0,
                    None => g.shots > 0,
                };
                let goals_against =
                    played.then(|| g.shots.saturating_sub(g.saves).min(allowed_cap));
                normalized.goalies.insert(
                    id,
                    GoalieLine {
                        goals_against,
                        empty_net_goals_against: 0,
                        assists: g.assists,
                    },
                );
            } else if let Some(s) = &player.stats.skater_stats {
                normalized.skaters.insert(
                    id,
                    SkaterLine {
                        goals: s.goals,
                        assists: s.assists,
                        shorthanded_goals: s.short_handed_goals,
                        shorthanded_points: s.short_handed_goals + s.short_handed_assists,
                        power_play_goals: s.power_play_goals,
                        power_play_points: s.power_play_goals + s.power_play_assists,
                        overtime_goals: None,
                    },
                );
            }
            // Scratched players carry an empty stats object and are skipped.
        }

        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RawBoxScore;
    use serde_json::json;

    fn legacy(value: serde_json::Value) -> LegacyBoxScore {
        match RawBoxScore::from_json(value).unwrap() {
            RawBoxScore::Legacy(b) => b,
            other => panic!("expected legacy shape, got {other:?}"),
        }
    }

    fn sample() -> serde_json::Value {
        json!({
            "teams": {
                "home": {
                    "teamStats": {"teamSkaterStats": {"goals": 1}},
                    "players": {
                        "ID8471214": {
                            "person": {"id": 8471214},
                            "stats": {"skaterStats": {"goals": 1, "assists": 0}}
                        }
                    }
                },
                "away": {
                    "teamStats": {"teamSkaterStats": {"goals": 4}},
                    "players": {
                        "ID8477955": {
                            "person": {"id": 8477955},
                            "stats": {"skaterStats": {
                                "goals": 2, "assists": 1,
                                "shortHandedGoals": 1, "shortHandedAssists": 0,
                                "powerPlayGoals": 0, "powerPlayAssists": 1
                            }}
                        },
                        "ID8478024": {
                            "person": {"id": 8478024},
                            "stats": {"goalieStats": {"timeOnIce": "60:00", "assists": 1, "shots": 30, "saves": 29}}
                        },
                        "ID8481020": {
                            "person": {"id": 8481020},
                            "stats": {"goalieStats": {"timeOnIce": "0:00", "shots": 0, "saves": 0}}
                        },
                        "ID8480000": {"person": {"id": 8480000}, "stats": {}}
                    }
                }
            },
            "linescore": {
                "currentPeriod": 3,
                "currentPeriodTimeRemaining": "Final",
                "hasShootout": false,
                "teams": {"home": {"goals": 1}, "away": {"goals": 4}}
            }
        })
    }

    #[test]
    fn status_and_scores_from_linescore() {
        let b = legacy(sample());
        assert_eq!(b.status(), Some(GameStatus::Final));
        assert_eq!(b.scores(), Some((1, 4)));
    }

    #[test]
    fn normalizes_away_side_skaters_and_goalies() {
        let n = legacy(sample()).normalize(Side::Away);
        assert_eq!((n.context.team_goals, n.context.opponent_goals), (4, 1));
        assert!(!n.context.is_overtime);

        let skater = n.skaters[&8477955];
        assert_eq!(skater.goals, 2);
        assert_eq!(skater.shorthanded_goals, 1);
        assert_eq!(skater.shorthanded_points, 1);
        assert_eq!(skater.power_play_points, 1);

        let starter = n.goalies[&8478024];
        assert_eq!(starter.goals_against, Some(1));
        assert_eq!(starter.assists, 1);
        assert_eq!(n.goalies[&8481020].goals_against, None);

        // Scratched player has no line.
        assert!(!n.skaters.contains_key(&8480000));
        assert!(!n.skaters.contains_key(&8471214));
    }

    #[test]
    fn shootout_detected_from_linescore() {
        let mut value = sample();
        value["linescore"]["currentPeriod"] = json!(5);
        value["linescore"]["hasShootout"] = json!(true);
        value["linescore"]["teams"] = json!({"home": {"goals": 2}, "away": {"goals": 3}});
        let ctx = legacy(value).context(Side::Home);
        assert!(ctx.is_overtime);
        assert!(ctx.is_shootout);
    }

    #[test]
    fn scores_fall_back_to_team_stats() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("linescore");
        let b = legacy(value);
        assert_eq!(b.scores(), Some((1, 4)));
        assert_eq!(b.status(), None);
    }
}
