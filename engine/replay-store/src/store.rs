//! SQLite implementation of the experience store.
//!
//! Two connections are kept open on the same WAL-mode database: every write
//! goes through `writer`, every read through `reader`, so sampling never
//! waits behind a game being recorded.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use draughts_core::Color;
use rand::Rng;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::sampling::{mixed_counts, weighted_sample_without_replacement};
use crate::types::{GameRecord, MixedSample, NewTransition, StoreStats, StoredTransition};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS games (
    game_id TEXT PRIMARY KEY,
    winner TEXT NOT NULL,
    total_moves INTEGER NOT NULL,
    duration_seconds REAL NOT NULL,
    timestamp REAL NOT NULL,
    player_color TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL REFERENCES games(game_id) ON DELETE CASCADE,
    move_number INTEGER NOT NULL,
    board_state TEXT NOT NULL,
    action TEXT NOT NULL,
    reward REAL NOT NULL,
    next_state TEXT NOT NULL,
    done INTEGER NOT NULL,
    player TEXT NOT NULL,
    priority REAL NOT NULL DEFAULT 1.0,
    heuristic_score REAL,
    heuristic_move TEXT
);
CREATE INDEX IF NOT EXISTS idx_transitions_game ON transitions(game_id);
CREATE INDEX IF NOT EXISTS idx_transitions_player ON transitions(player);
CREATE INDEX IF NOT EXISTS idx_games_timestamp ON games(timestamp);
";

const COLUMNS: &str = "t.id, t.game_id, t.move_number, t.board_state, t.action, t.reward, \
     t.next_state, t.done, t.player, t.priority, t.heuristic_score, t.heuristic_move";

/// Durable game/transition log with bounded retention.
pub struct ExperienceStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    max_games: usize,
    path: PathBuf,
}

impl ExperienceStore {
    /// Open (or create) the database at `path`, keeping at most `max_games`
    /// games.
    pub fn open(path: impl AsRef<Path>, max_games: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&path)?;
        let mode: String =
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, path = %path.display(), "Opened experience store");
        configure(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open(&path)?;
        configure(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            max_games: max_games.max(1),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_games(&self) -> usize {
        self.max_games
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.writer
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.reader
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Insert a game with all of its transitions in one transaction, then
    /// evict the oldest games beyond `max_games`.
    ///
    /// Re-recording an existing `game_id` replaces the game and its
    /// transitions. Returns the number of evicted games.
    pub fn add_game(
        &self,
        game: &GameRecord,
        transitions: &[NewTransition],
    ) -> Result<usize, StoreError> {
        let conn = self.writer()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM transitions WHERE game_id = ?1",
            params![game.game_id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO games
             (game_id, winner, total_moves, duration_seconds, timestamp, player_color)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                game.game_id,
                game.outcome.as_str(),
                game.total_moves,
                game.duration_seconds,
                game.timestamp,
                game.agent_color.as_str(),
            ],
        )?;

        let mut stmt = tx.prepare_cached(
            "INSERT INTO transitions
             (game_id, move_number, board_state, action, reward, next_state, done,
              player, priority, heuristic_score, heuristic_move)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for t in transitions {
            let action = serde_json::to_string(&t.action)?;
            stmt.execute(params![
                game.game_id,
                t.move_number,
                t.board_state,
                action,
                t.reward as f64,
                t.next_state,
                t.done as i32,
                t.player.as_str(),
                t.priority as f64,
                t.heuristic_score.map(f64::from),
                t.heuristic_move,
            ])?;
        }
        drop(stmt);

        let evicted = evict_oldest(&tx, self.max_games)?;
        tx.commit()?;

        debug!(
            game_id = %game.game_id,
            transitions = transitions.len(),
            "Stored game"
        );
        if evicted > 0 {
            info!(evicted, max_games = self.max_games, "Evicted oldest games");
        }
        Ok(evicted)
    }

    /// Most recent transitions for `player`: newest game first, then in-game
    /// order.
    pub fn recent(&self, n: usize, player: Color) -> Result<Vec<StoredTransition>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM transitions t
             JOIN games g ON g.game_id = t.game_id
             WHERE t.player = ?1
             ORDER BY g.timestamp DESC, t.game_id, t.move_number
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![player.as_str(), n as i64], row_to_transition)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Uniformly random transitions for `player`.
    pub fn random(&self, n: usize, player: Color) -> Result<Vec<StoredTransition>, StoreError> {
        self.random_excluding(n, player, &[])
    }

    /// Uniformly random transitions for `player` whose ids are not in
    /// `exclude`.
    fn random_excluding(
        &self,
        n: usize,
        player: Color,
        exclude: &[i64],
    ) -> Result<Vec<StoredTransition>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let excluded = if exclude.is_empty() {
            String::new()
        } else {
            format!(" AND t.id NOT IN ({})", vec!["?"; exclude.len()].join(", "))
        };
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM transitions t
             WHERE t.player = ?{excluded}
             ORDER BY RANDOM()
             LIMIT ?"
        ))?;

        let mut values = Vec::with_capacity(exclude.len() + 2);
        values.push(Value::Text(player.as_str().to_string()));
        values.extend(exclude.iter().map(|&id| Value::Integer(id)));
        values.push(Value::Integer(n as i64));
        let rows = stmt.query_map(params_from_iter(values), row_to_transition)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Recent and random halves of a mixed batch, unshuffled. The random
    /// half never repeats a transition from the recent half, so the batch is
    /// smaller than `batch_size` only when the store holds fewer transitions.
    pub fn mixed_split(
        &self,
        batch_size: usize,
        recent_ratio: f64,
        player: Color,
    ) -> Result<MixedSample, StoreError> {
        let (recent_n, random_n) = mixed_counts(batch_size, recent_ratio);
        let recent = self.recent(recent_n, player)?;
        let taken: Vec<i64> = recent.iter().map(|t| t.id).collect();
        let random = self.random_excluding(random_n, player, &taken)?;
        Ok(MixedSample { recent, random })
    }

    /// `round(batch_size * recent_ratio)` recent transitions plus random
    /// ones for the remainder, shuffled together.
    pub fn mixed(
        &self,
        batch_size: usize,
        recent_ratio: f64,
        player: Color,
    ) -> Result<Vec<StoredTransition>, StoreError> {
        let split = self.mixed_split(batch_size, recent_ratio, player)?;
        Ok(split.into_shuffled(&mut rand::thread_rng()))
    }

    /// Sample without replacement with probability proportional to
    /// `priority^(1/temperature)`.
    pub fn prioritized(
        &self,
        batch_size: usize,
        temperature: f64,
        player: Color,
    ) -> Result<Vec<StoredTransition>, StoreError> {
        self.prioritized_with_rng(batch_size, temperature, player, &mut rand::thread_rng())
    }

    pub fn prioritized_with_rng<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        temperature: f64,
        player: Color,
        rng: &mut R,
    ) -> Result<Vec<StoredTransition>, StoreError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;

        let ids = {
            let mut stmt =
                conn.prepare_cached("SELECT id, priority FROM transitions WHERE player = ?1")?;
            let mut rows = stmt.query(params![player.as_str()])?;
            let mut failure = None;
            let candidates = std::iter::from_fn(|| match rows.next() {
                Ok(Some(row)) => match (row.get::<_, i64>(0), row.get::<_, f64>(1)) {
                    (Ok(id), Ok(priority)) => Some((id, priority)),
                    (Err(e), _) | (_, Err(e)) => {
                        failure = Some(e);
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    failure = Some(e);
                    None
                }
            });
            let ids = weighted_sample_without_replacement(candidates, batch_size, temperature, rng);
            if let Some(e) = failure {
                return Err(e.into());
            }
            ids
        };

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM transitions t WHERE t.id = ?1"
        ))?;
        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(t) = stmt.query_row(params![id], row_to_transition).optional()? {
                batch.push(t);
            }
        }
        Ok(batch)
    }

    /// Overwrite sampling priorities, typically with |advantage| after a
    /// training step. Unknown ids are ignored.
    pub fn update_priorities(&self, updates: &[(i64, f32)]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let conn = self.writer()?;
        let tx = conn.unchecked_transaction()?;
        let mut stmt = tx.prepare_cached("UPDATE transitions SET priority = ?2 WHERE id = ?1")?;
        for (id, priority) in updates {
            let priority = if priority.is_finite() {
                priority.max(0.0) as f64
            } else {
                1.0
            };
            stmt.execute(params![id, priority])?;
        }
        drop(stmt);
        tx.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.reader()?;
        let (total_games, average_moves): (i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), AVG(total_moves) FROM games",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total_transitions: i64 =
            conn.query_row("SELECT COUNT(*) FROM transitions", [], |row| row.get(0))?;

        let mut stats = StoreStats {
            total_games: total_games as u64,
            total_transitions: total_transitions as u64,
            average_moves: average_moves.unwrap_or(0.0),
            ..Default::default()
        };
        let mut stmt = conn.prepare_cached("SELECT winner, COUNT(*) FROM games GROUP BY winner")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (winner, count) = row?;
            stats.outcomes.insert(winner, count as u64);
        }
        Ok(stats)
    }

    /// Transitions available for `player`; gates the training loop.
    pub fn count_transitions(&self, player: Color) -> Result<u64, StoreError> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transitions WHERE player = ?1",
            params![player.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every transition of one game in move order.
    pub fn game_trajectory(&self, game_id: &str) -> Result<Vec<StoredTransition>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM transitions t WHERE t.game_id = ?1 ORDER BY t.move_number, t.id"
        ))?;
        let rows = stmt.query_map(params![game_id], row_to_transition)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.writer()?;
        conn.execute_batch("DELETE FROM transitions; DELETE FROM games;")?;
        Ok(())
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Delete the oldest games (timestamp, then insertion order) and their
/// transitions until at most `max_games` remain.
fn evict_oldest(conn: &Connection, max_games: usize) -> Result<usize, StoreError> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM games", [], |row| row.get(0))?;
    let excess = total - max_games as i64;
    if excess <= 0 {
        return Ok(0);
    }
    let victims = "SELECT game_id FROM games ORDER BY timestamp ASC, rowid ASC LIMIT ?1";
    conn.execute(
        &format!("DELETE FROM transitions WHERE game_id IN ({victims})"),
        params![excess],
    )?;
    let deleted = conn.execute(
        &format!("DELETE FROM games WHERE game_id IN ({victims})"),
        params![excess],
    )?;
    Ok(deleted)
}

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

fn row_to_transition(row: &Row<'_>) -> rusqlite::Result<StoredTransition> {
    let action: String = row.get(4)?;
    let action = serde_json::from_str(&action).map_err(|e| conversion_error(4, e))?;
    let player: String = row.get(8)?;
    let player = player.parse::<Color>().map_err(|e| conversion_error(8, e))?;

    Ok(StoredTransition {
        id: row.get(0)?,
        game_id: row.get(1)?,
        move_number: row.get(2)?,
        board_state: row.get(3)?,
        action,
        reward: row.get::<_, f64>(5)? as f32,
        next_state: row.get(6)?,
        done: row.get::<_, i64>(7)? != 0,
        player,
        priority: row.get::<_, f64>(9)? as f32,
        heuristic_score: row.get::<_, Option<f64>>(10)?.map(|s| s as f32),
        heuristic_move: row.get(11)?,
    })
}
