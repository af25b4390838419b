// SQLite persistence for players, games, picks, performances, and standings.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{NewGame, NewPick, NewPlayer, SettlementCommit, Store, UpsertOutcome};
use crate::model::{
    Game, GameId, GameStatus, LeagueId, LeagueMembership, Pick, PickId, PickTarget, Player,
    PlayerId, PlayerPerformance, Position, Role, UserId,
};

const PICK_COLUMNS: &str = "id, user_id, league_id, game_id, pick_type, player_id, player_name,
     points_earned, locked_at, created_at, updated_at";

const GAME_COLUMNS: &str = "id, opponent, is_home, start_time, status, team_score, opponent_score,
     external_id, settled_at, settlement_run, went_to_overtime, went_to_shootout";

const PERFORMANCE_COLUMNS: &str = "player_id, game_id, goals, assists, shorthanded_goals,
     shorthanded_points, power_play_goals, power_play_points, overtime_goals, goals_against,
     empty_net_goals_against, synthesized";

/// SQLite-backed implementation of [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and ensure the schema exists.
    /// Pass `":memory:"` for an ephemeral database (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS players (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                name          TEXT NOT NULL,
                jersey_number INTEGER,
                position      TEXT NOT NULL CHECK (position IN ('F', 'D', 'G')),
                active        INTEGER NOT NULL DEFAULT 1,
                external_id   INTEGER UNIQUE
            );

            CREATE TABLE IF NOT EXISTS games (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                opponent       TEXT NOT NULL,
                is_home        INTEGER NOT NULL,
                start_time     TEXT NOT NULL,
                status         TEXT NOT NULL DEFAULT 'scheduled',
                team_score     INTEGER,
                opponent_score INTEGER,
                external_id    INTEGER UNIQUE,
                settled_at     TEXT,
                settlement_run TEXT,
                went_to_overtime INTEGER NOT NULL DEFAULT 0,
                went_to_shootout INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS league_memberships (
                league_id      INTEGER NOT NULL,
                user_id        INTEGER NOT NULL,
                role           TEXT NOT NULL DEFAULT 'member',
                draft_position INTEGER,
                total_points   INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (league_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS picks (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER NOT NULL,
                league_id     INTEGER NOT NULL,
                game_id       INTEGER NOT NULL REFERENCES games(id),
                pick_type     TEXT NOT NULL,
                player_id     INTEGER REFERENCES players(id),
                player_name   TEXT,
                points_earned INTEGER NOT NULL DEFAULT 0,
                locked_at     TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                UNIQUE (user_id, league_id, game_id),
                CHECK ((pick_type = 'team' AND player_id IS NULL)
                    OR (pick_type = 'player' AND player_id IS NOT NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_picks_game ON picks(game_id);

            CREATE TABLE IF NOT EXISTS player_performances (
                player_id               INTEGER NOT NULL REFERENCES players(id),
                game_id                 INTEGER NOT NULL REFERENCES games(id),
                goals                   INTEGER NOT NULL DEFAULT 0,
                assists                 INTEGER NOT NULL DEFAULT 0,
                shorthanded_goals       INTEGER NOT NULL DEFAULT 0,
                shorthanded_points      INTEGER NOT NULL DEFAULT 0,
                power_play_goals        INTEGER NOT NULL DEFAULT 0,
                power_play_points       INTEGER NOT NULL DEFAULT 0,
                overtime_goals          INTEGER,
                goals_against           INTEGER,
                empty_net_goals_against INTEGER NOT NULL DEFAULT 0,
                synthesized             INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (player_id, game_id)
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. Panics if a previous holder panicked mid-query.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {raw:?}: {e}")))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    let code: String = row.get(3)?;
    let position = Position::from_str_pos(&code)
        .ok_or_else(|| conversion_error(3, format!("unknown position {code:?}")))?;
    Ok(Player {
        id: row.get(0)?,
        name: row.get(1)?,
        jersey_number: row.get(2)?,
        position,
        active: row.get(4)?,
        external_id: row.get(5)?,
    })
}

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    let status_raw: String = row.get(4)?;
    let status = GameStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(4, format!("unknown game status {status_raw:?}")))?;
    Ok(Game {
        id: row.get(0)?,
        opponent: row.get(1)?,
        is_home: row.get(2)?,
        start_time: get_ts(row, 3)?,
        status,
        team_score: row.get(5)?,
        opponent_score: row.get(6)?,
        external_id: row.get(7)?,
        settled_at: get_opt_ts(row, 8)?,
        settlement_run: row.get(9)?,
        went_to_overtime: row.get(10)?,
        went_to_shootout: row.get(11)?,
    })
}

fn pick_from_row(row: &Row<'_>) -> rusqlite::Result<Pick> {
    let pick_type: String = row.get(4)?;
    let player_id: Option<PlayerId> = row.get(5)?;
    let target = match (pick_type.as_str(), player_id) {
        ("team", None) => PickTarget::Team,
        ("player", Some(player_id)) => PickTarget::Player {
            player_id,
            player_name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        },
        _ => {
            return Err(conversion_error(
                4,
                format!("inconsistent pick target {pick_type:?} / {player_id:?}"),
            ))
        }
    };
    Ok(Pick {
        id: row.get(0)?,
        user_id: row.get(1)?,
        league_id: row.get(2)?,
        game_id: row.get(3)?,
        target,
        points_earned: row.get(7)?,
        locked_at: get_opt_ts(row, 8)?,
        created_at: get_ts(row, 9)?,
        updated_at: get_ts(row, 10)?,
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<LeagueMembership> {
    let role_raw: String = row.get(2)?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| conversion_error(2, format!("unknown role {role_raw:?}")))?;
    Ok(LeagueMembership {
        league_id: row.get(0)?,
        user_id: row.get(1)?,
        role,
        draft_position: row.get(3)?,
        total_points: row.get(4)?,
    })
}

fn performance_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerPerformance> {
    Ok(PlayerPerformance {
        player_id: row.get(0)?,
        game_id: row.get(1)?,
        goals: row.get(2)?,
        assists: row.get(3)?,
        shorthanded_goals: row.get(4)?,
        shorthanded_points: row.get(5)?,
        power_play_goals: row.get(6)?,
        power_play_points: row.get(7)?,
        overtime_goals: row.get(8)?,
        goals_against: row.get(9)?,
        empty_net_goals_against: row.get(10)?,
        synthesized: row.get(11)?,
    })
}

fn upsert_performance_with(conn: &Connection, p: &PlayerPerformance) -> Result<()> {
    conn.execute(
        "INSERT INTO player_performances
            (player_id, game_id, goals, assists, shorthanded_goals, shorthanded_points,
             power_play_goals, power_play_points, overtime_goals, goals_against,
             empty_net_goals_against, synthesized)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(player_id, game_id) DO UPDATE SET
            goals                   = excluded.goals,
            assists                 = excluded.assists,
            shorthanded_goals       = excluded.shorthanded_goals,
            shorthanded_points      = excluded.shorthanded_points,
            power_play_goals        = excluded.power_play_goals,
            power_play_points       = excluded.power_play_points,
            overtime_goals          = excluded.overtime_goals,
            goals_against           = excluded.goals_against,
            empty_net_goals_against = excluded.empty_net_goals_against,
            synthesized             = excluded.synthesized",
        params![
            p.player_id,
            p.game_id,
            p.goals,
            p.assists,
            p.shorthanded_goals,
            p.shorthanded_points,
            p.power_play_goals,
            p.power_play_points,
            p.overtime_goals,
            p.goals_against,
            p.empty_net_goals_against,
            p.synthesized,
        ],
    )
    .context("failed to upsert player performance")?;
    Ok(())
}

fn query_picks(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Pick>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare pick query")?;
    let picks = stmt
        .query_map(args, pick_from_row)
        .context("failed to query picks")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map pick rows")?;
    Ok(picks)
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_player(&self, player: &NewPlayer) -> Result<PlayerId> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO players (name, jersey_number, position, active, external_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(external_id) DO UPDATE SET
                    name          = excluded.name,
                    jersey_number = excluded.jersey_number,
                    position      = excluded.position,
                    active        = excluded.active
                 RETURNING id",
                params![
                    player.name,
                    player.jersey_number,
                    player.position.display_str(),
                    player.active,
                    player.external_id,
                ],
                |row| row.get(0),
            )
            .context("failed to upsert player")?;
        Ok(id)
    }

    async fn player(&self, id: PlayerId) -> Result<Option<Player>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, jersey_number, position, active, external_id
             FROM players WHERE id = ?1",
            params![id],
            player_from_row,
        )
        .optional()
        .context("failed to load player")
    }

    async fn upsert_game(&self, game: &NewGame) -> Result<GameId> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO games (opponent, is_home, start_time, external_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(external_id) DO UPDATE SET
                    opponent   = excluded.opponent,
                    is_home    = excluded.is_home,
                    start_time = excluded.start_time
                 RETURNING id",
                params![
                    game.opponent,
                    game.is_home,
                    format_ts(&game.start_time),
                    game.external_id,
                ],
                |row| row.get(0),
            )
            .context("failed to upsert game")?;
        Ok(id)
    }

    async fn game(&self, id: GameId) -> Result<Option<Game>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"),
            params![id],
            game_from_row,
        )
        .optional()
        .context("failed to load game")
    }

    async fn unsettled_games(&self) -> Result<Vec<Game>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {GAME_COLUMNS} FROM games WHERE settled_at IS NULL ORDER BY start_time"
            ))
            .context("failed to prepare unsettled_games query")?;
        let games = stmt
            .query_map([], game_from_row)
            .context("failed to query unsettled games")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map game rows")?;
        Ok(games)
    }

    async fn update_game_state(
        &self,
        id: GameId,
        status: GameStatus,
        team_score: Option<u32>,
        opponent_score: Option<u32>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE games SET
                status         = CASE WHEN status = 'final' THEN status ELSE ?2 END,
                team_score     = COALESCE(?3, team_score),
                opponent_score = COALESCE(?4, opponent_score)
             WHERE id = ?1 AND settled_at IS NULL",
            params![id, status.as_str(), team_score, opponent_score],
        )
        .context("failed to update game state")?;
        Ok(())
    }

    async fn add_membership(&self, league_id: LeagueId, user_id: UserId, role: Role) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO league_memberships (league_id, user_id, role)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(league_id, user_id) DO UPDATE SET role = excluded.role",
            params![league_id, user_id, role.as_str()],
        )
        .context("failed to add league membership")?;
        Ok(())
    }

    async fn membership(
        &self,
        league_id: LeagueId,
        user_id: UserId,
    ) -> Result<Option<LeagueMembership>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT league_id, user_id, role, draft_position, total_points
             FROM league_memberships WHERE league_id = ?1 AND user_id = ?2",
            params![league_id, user_id],
            membership_from_row,
        )
        .optional()
        .context("failed to load league membership")
    }

    async fn memberships(&self, league_id: LeagueId) -> Result<Vec<LeagueMembership>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT league_id, user_id, role, draft_position, total_points
                 FROM league_memberships WHERE league_id = ?1 ORDER BY user_id",
            )
            .context("failed to prepare memberships query")?;
        let members = stmt
            .query_map(params![league_id], membership_from_row)
            .context("failed to query memberships")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map membership rows")?;
        Ok(members)
    }

    async fn set_draft_positions(
        &self,
        league_id: LeagueId,
        positions: &[(UserId, Option<u32>)],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        for (user_id, position) in positions {
            tx.execute(
                "UPDATE league_memberships SET draft_position = ?3
                 WHERE league_id = ?1 AND user_id = ?2",
                params![league_id, user_id, position],
            )
            .context("failed to update draft position")?;
        }
        tx.commit().context("failed to commit draft positions")?;
        Ok(())
    }

    async fn pick(&self, id: PickId) -> Result<Option<Pick>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PICK_COLUMNS} FROM picks WHERE id = ?1"),
            params![id],
            pick_from_row,
        )
        .optional()
        .context("failed to load pick")
    }

    async fn find_pick(
        &self,
        user_id: UserId,
        league_id: LeagueId,
        game_id: GameId,
    ) -> Result<Option<Pick>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PICK_COLUMNS} FROM picks
                 WHERE user_id = ?1 AND league_id = ?2 AND game_id = ?3"
            ),
            params![user_id, league_id, game_id],
            pick_from_row,
        )
        .optional()
        .context("failed to find pick")
    }

    async fn picks_for_game(&self, game_id: GameId) -> Result<Vec<Pick>> {
        let conn = self.conn();
        query_picks(
            &conn,
            &format!("SELECT {PICK_COLUMNS} FROM picks WHERE game_id = ?1 ORDER BY id"),
            params![game_id],
        )
    }

    async fn picks_for_league_game(&self, league_id: LeagueId, game_id: GameId) -> Result<Vec<Pick>> {
        let conn = self.conn();
        query_picks(
            &conn,
            &format!(
                "SELECT {PICK_COLUMNS} FROM picks
                 WHERE league_id = ?1 AND game_id = ?2 ORDER BY id"
            ),
            params![league_id, game_id],
        )
    }

    async fn upsert_pick(&self, pick: &NewPick) -> Result<(Pick, UpsertOutcome)> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let existed: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM picks
                 WHERE user_id = ?1 AND league_id = ?2 AND game_id = ?3)",
                params![pick.user_id, pick.league_id, pick.game_id],
                |row| row.get(0),
            )
            .context("failed to check existing pick")?;

        let (player_id, player_name) = match &pick.target {
            PickTarget::Player {
                player_id,
                player_name,
            } => (Some(*player_id), Some(player_name.as_str())),
            PickTarget::Team => (None, None),
        };
        let at = format_ts(&pick.at);

        // An existing lock always survives; only a fresh row takes `locked_at`.
        let stored = tx
            .query_row(
                &format!(
                    "INSERT INTO picks
                        (user_id, league_id, game_id, pick_type, player_id, player_name,
                         locked_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                     ON CONFLICT(user_id, league_id, game_id) DO UPDATE SET
                        pick_type   = excluded.pick_type,
                        player_id   = excluded.player_id,
                        player_name = excluded.player_name,
                        locked_at   = COALESCE(picks.locked_at, excluded.locked_at),
                        updated_at  = excluded.updated_at
                     RETURNING {PICK_COLUMNS}"
                ),
                params![
                    pick.user_id,
                    pick.league_id,
                    pick.game_id,
                    pick.target.kind(),
                    player_id,
                    player_name,
                    pick.locked_at.as_ref().map(format_ts),
                    at,
                ],
                pick_from_row,
            )
            .context("failed to upsert pick")?;

        tx.commit().context("failed to commit pick upsert")?;

        let outcome = if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };
        Ok((stored, outcome))
    }

    async fn lock_picks(
        &self,
        game_id: GameId,
        league_id: Option<LeagueId>,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE picks SET locked_at = ?3
                 WHERE game_id = ?1 AND (?2 IS NULL OR league_id = ?2) AND locked_at IS NULL",
                params![game_id, league_id, format_ts(&at)],
            )
            .context("failed to lock picks")?;
        Ok(changed)
    }

    async fn upsert_performance(&self, performance: &PlayerPerformance) -> Result<()> {
        let conn = self.conn();
        upsert_performance_with(&conn, performance)
    }

    async fn performance(
        &self,
        player_id: PlayerId,
        game_id: GameId,
    ) -> Result<Option<PlayerPerformance>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PERFORMANCE_COLUMNS} FROM player_performances
                 WHERE player_id = ?1 AND game_id = ?2"
            ),
            params![player_id, game_id],
            performance_from_row,
        )
        .optional()
        .context("failed to load player performance")
    }

    async fn commit_settlement(&self, commit: &SettlementCommit) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin settlement transaction")?;

        let claimed = tx
            .execute(
                "UPDATE games SET settled_at = ?2, settlement_run = ?3,
                    went_to_overtime = ?4, went_to_shootout = ?5,
                    team_score = COALESCE(team_score, ?6),
                    opponent_score = COALESCE(opponent_score, ?7)
                 WHERE id = ?1 AND settled_at IS NULL AND status = 'final'",
                params![
                    commit.game_id,
                    format_ts(&commit.settled_at),
                    commit.run_id,
                    commit.context.is_overtime,
                    commit.context.is_shootout,
                    commit.final_score.map(|(team, _)| team),
                    commit.final_score.map(|(_, opponent)| opponent),
                ],
            )
            .context("failed to claim game for settlement")?;
        if claimed == 0 {
            // Dropping the transaction rolls it back; nothing was written.
            return Ok(false);
        }

        for performance in &commit.performances {
            upsert_performance_with(&tx, performance)?;
        }

        for pp in &commit.pick_points {
            tx.execute(
                "UPDATE picks SET points_earned = ?2 WHERE id = ?1 AND game_id = ?3",
                params![pp.pick_id, pp.points, commit.game_id],
            )
            .context("failed to record pick points")?;
        }

        for delta in &commit.deltas {
            tx.execute(
                "UPDATE league_memberships SET total_points = total_points + ?3
                 WHERE league_id = ?1 AND user_id = ?2",
                params![delta.league_id, delta.user_id, delta.points],
            )
            .context("failed to increment standings")?;
        }

        tx.commit().context("failed to commit settlement")?;
        Ok(true)
    }
}
