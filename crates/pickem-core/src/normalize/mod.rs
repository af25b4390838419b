// Box-score normalization: upstream shapes in, canonical stat lines out.
//
// Every source-specific field name stays inside this module tree. The rest of
// the crate only sees `NormalizedBoxScore`, `GameContext`, and
// `PlayerPerformance`.

pub mod gamecenter;
pub mod legacy;

use std::collections::HashMap;

use serde::Deserialize;

use crate::model::{GameId, GameStatus, Player, PlayerPerformance, Position};
use crate::scoring::GameContext;

pub use gamecenter::GamecenterBoxScore;
pub use legacy::LegacyBoxScore;

/// Which side of the box score is our team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn from_is_home(is_home: bool) -> Self {
        if is_home {
            Side::Home
        } else {
            Side::Away
        }
    }

    /// Pick (ours, theirs) out of a (home, away) pair.
    pub fn split<T>(self, home: T, away: T) -> (T, T) {
        match self {
            Side::Home => (home, away),
            Side::Away => (away, home),
        }
    }
}

/// An upstream box score in any supported shape.
///
/// The shapes are told apart by their required top-level fields
/// (`playerByGameStats` vs `teams`), so untagged deserialization is
/// unambiguous.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBoxScore {
    Gamecenter(GamecenterBoxScore),
    Legacy(LegacyBoxScore),
}

impl RawBoxScore {
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Upstream game status, when the shape carries one.
    pub fn status(&self) -> Option<GameStatus> {
        match self {
            RawBoxScore::Gamecenter(b) => b.status(),
            RawBoxScore::Legacy(b) => b.status(),
        }
    }

    /// Official (home, away) scores.
    pub fn scores(&self) -> Option<(u32, u32)> {
        match self {
            RawBoxScore::Gamecenter(b) => b.scores(),
            RawBoxScore::Legacy(b) => b.scores(),
        }
    }
}

/// Canonical skater counts for one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkaterLine {
    pub goals: u32,
    pub assists: u32,
    pub shorthanded_goals: u32,
    pub shorthanded_points: u32,
    pub power_play_goals: u32,
    pub power_play_points: u32,
    pub overtime_goals: Option<u32>,
}

/// Canonical goalie counts for one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalieLine {
    /// `None` when the goalie dressed but never played.
    pub goals_against: Option<u32>,
    pub empty_net_goals_against: u32,
    pub assists: u32,
}

impl GoalieLine {
    pub fn shutout(&self) -> bool {
        self.goals_against
            .map(|ga| ga.saturating_sub(self.empty_net_goals_against) == 0)
            .unwrap_or(false)
    }
}

/// Our side of one finished game, keyed by upstream player id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBoxScore {
    pub context: GameContext,
    pub skaters: HashMap<i64, SkaterLine>,
    pub goalies: HashMap<i64, GoalieLine>,
}

impl NormalizedBoxScore {
    /// Canonical performance for `player`, or `None` if the source has no line
    /// for them (or they have no upstream id to match on).
    pub fn performance_for(&self, player: &Player, game_id: GameId) -> Option<PlayerPerformance> {
        let external_id = player.external_id?;
        match player.position {
            Position::Goalie => self.goalies.get(&external_id).map(|g| PlayerPerformance {
                player_id: player.id,
                game_id,
                assists: g.assists,
                goals_against: g.goals_against,
                empty_net_goals_against: g.empty_net_goals_against,
                ..Default::default()
            }),
            Position::Forward | Position::Defense => {
                self.skaters.get(&external_id).map(|s| PlayerPerformance {
                    player_id: player.id,
                    game_id,
                    goals: s.goals,
                    assists: s.assists,
                    shorthanded_goals: s.shorthanded_goals,
                    shorthanded_points: s.shorthanded_points,
                    power_play_goals: s.power_play_goals,
                    power_play_points: s.power_play_points,
                    overtime_goals: s.overtime_goals,
                    ..Default::default()
                })
            }
        }
    }
}

/// Normalize any supported shape from our side's point of view.
pub fn normalize(raw: &RawBoxScore, side: Side) -> NormalizedBoxScore {
    match raw {
        RawBoxScore::Gamecenter(b) => b.normalize(side),
        RawBoxScore::Legacy(b) => b.normalize(side),
    }
}

/// Goals the opposing team scored against our goalies, excluding the one-goal
/// shootout credit when they won the shootout.
pub(crate) fn opponent_goals_excluding_shootout(context: &GameContext) -> u32 {
    if context.is_shootout && context.opponent_goals > context.team_goals {
        context.opponent_goals.saturating_sub(1)
    } else {
        context.opponent_goals
    }
}

/// Parse a `MM:SS` time-on-ice string into seconds.
pub(crate) fn toi_seconds(toi: &str) -> Option<u32> {
    let (mins, secs) = toi.trim().split_once(':')?;
    mins.parse::<u32>()
        .ok()?
        .checked_mul(60)?
        .checked_add(secs.parse::<u32>().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player(id: i64, position: Position, external_id: Option<i64>) -> Player {
        Player {
            id,
            name: format!("Player {id}"),
            jersey_number: None,
            position,
            active: true,
            external_id,
        }
    }

    #[test]
    fn side_split_orders_pairs() {
        assert_eq!(Side::Home.split(3, 1), (3, 1));
        assert_eq!(Side::Away.split(3, 1), (1, 3));
    }

    #[test]
    fn untagged_picks_gamecenter_shape() {
        let raw = RawBoxScore::from_json(json!({
            "gameState": "OFF",
            "homeTeam": {"abbrev": "SEA", "score": 2},
            "awayTeam": {"abbrev": "VAN", "score": 1},
            "playerByGameStats": {"homeTeam": {}, "awayTeam": {}}
        }))
        .unwrap();
        assert!(matches!(raw, RawBoxScore::Gamecenter(_)));
        assert_eq!(raw.status(), Some(GameStatus::Final));
        assert_eq!(raw.scores(), Some((2, 1)));
    }

    #[test]
    fn untagged_picks_legacy_shape() {
        let raw = RawBoxScore::from_json(json!({
            "teams": {
                "home": {"players": {}},
                "away": {"players": {}}
            }
        }))
        .unwrap();
        assert!(matches!(raw, RawBoxScore::Legacy(_)));
    }

    #[test]
    fn unknown_shape_is_an_error() {
        assert!(RawBoxScore::from_json(json!({"foo": 1})).is_err());
    }

    #[test]
    fn performance_for_missing_player_is_none() {
        let normalized = NormalizedBoxScore::default();
        assert!(normalized
            .performance_for(&player(1, Position::Forward, Some(8478402)), 10)
            .is_none());
        // No upstream id means nothing to match on.
        assert!(normalized
            .performance_for(&player(1, Position::Forward, None), 10)
            .is_none());
    }

    #[test]
    fn performance_for_goalie_uses_goalie_line() {
        let mut normalized = NormalizedBoxScore::default();
        normalized.goalies.insert(
            99,
            GoalieLine {
                goals_against: Some(1),
                empty_net_goals_against: 0,
                assists: 1,
            },
        );
        let perf = normalized
            .performance_for(&player(5, Position::Goalie, Some(99)), 10)
            .unwrap();
        assert_eq!(perf.player_id, 5);
        assert_eq!(perf.game_id, 10);
        assert_eq!(perf.goals_against, Some(1));
        assert_eq!(perf.assists, 1);
        assert!(!perf.synthesized);
    }

    #[test]
    fn shootout_credit_removed_only_for_opponent_win() {
        let lost_shootout = GameContext {
            is_overtime: true,
            is_shootout: true,
            team_goals: 2,
            opponent_goals: 3,
        };
        assert_eq!(opponent_goals_excluding_shootout(&lost_shootout), 2);

        let won_shootout = GameContext {
            team_goals: 3,
            opponent_goals: 2,
            ..lost_shootout
        };
        assert_eq!(opponent_goals_excluding_shootout(&won_shootout), 2);
    }

    #[test]
    fn toi_parses_minutes_and_seconds() {
        assert_eq!(toi_seconds("59:32"), Some(3572));
        assert_eq!(toi_seconds("00:00"), Some(0));
        assert_eq!(toi_seconds("bogus"), None);
    }

    #[test]
    fn toi_out_of_range_is_unreadable() {
        assert_eq!(toi_seconds("99999999:00"), None);
        assert_eq!(toi_seconds("71582789:00"), None);
        assert_eq!(toi_seconds("71582788:15"), Some(u32::MAX));
        assert_eq!(toi_seconds("71582788:16"), None);
    }

    #[test]
    fn goalie_shutout_flag() {
        let line = GoalieLine {
            goals_against: Some(1),
            empty_net_goals_against: 1,
            assists: 0,
        };
        assert!(line.shutout());
        assert!(!GoalieLine::default().shutout());
    }
}
