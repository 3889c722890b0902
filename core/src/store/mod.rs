//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Builders, the score engine and the aggregator call store methods;
//! they never execute SQL directly.

mod grid;
mod score;
mod stats;

pub use score::{ScoreRun, ScoreSummary};
pub use stats::RadiusStats;

use crate::{error::EngineResult, types::CellId};
use rusqlite::Connection;

pub struct GridStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl GridStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL lets radius queries read while a rebuild is writing.
        // Shared-memory and :memory: databases ignore it.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            log::debug!("{path}: WAL not enabled: {e}");
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a second connection to the same database, e.g. for a reader
    /// thread. In-memory databases cannot be shared this way and yield a
    /// fresh, isolated database.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_grid.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_stats.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_scores.sql"))?;
        Ok(())
    }

    /// Run `f` inside one transaction. Any error rolls everything back.
    pub fn in_transaction<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Self) -> EngineResult<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    /// Load `cell_ids` into the connection-local `temp.matched_cell` table,
    /// replacing its previous contents. Radius rollups join against it, so
    /// the match set never counts toward SQLite's bound-variable limit.
    fn stage_matched_cells(&self, cell_ids: &[CellId]) -> EngineResult<()> {
        self.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS matched_cell (cell_id INTEGER PRIMARY KEY);
             DELETE FROM temp.matched_cell;",
        )?;
        // Within an open transaction the inserts simply join it.
        let tx = if self.conn.is_autocommit() {
            Some(self.conn.unchecked_transaction()?)
        } else {
            None
        };
        {
            let mut stmt = self
                .conn
                .prepare_cached("INSERT OR IGNORE INTO temp.matched_cell (cell_id) VALUES (?1)")?;
            for id in cell_ids {
                stmt.execute(rusqlite::params![id])?;
            }
        }
        if let Some(tx) = tx {
            tx.commit()?;
        }
        log::trace!("staged {} matched cells", cell_ids.len());
        Ok(())
    }
}
