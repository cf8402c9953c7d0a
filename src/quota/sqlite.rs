use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::QuotaLedger;
use crate::consts::unix_now;

/// SQLite-backed quota ledger: one row per user with the start of their
/// current window and the units used in it.
///
/// Shares a database with [`SqliteCache`](crate::cache::sqlite::SqliteCache)
/// and [`Config`](crate::config::Config).
pub struct SqliteQuota {
    conn: Mutex<Connection>,
}

impl SqliteQuota {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open quota database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS quota (
                user         TEXT PRIMARY KEY,
                window_start INTEGER NOT NULL,
                used         INTEGER NOT NULL CHECK (used >= 0)
            )",
        )
        .context("failed to create quota table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

/// `(window_start, used)` if the stored window is still open.
fn current(conn: &Connection, user: &str, window: Duration, now: u64) -> Result<Option<(u64, u32)>> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT window_start, used FROM quota WHERE user = ?1",
            [user],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(start, used)| {
        let start = start.max(0) as u64;
        (now.saturating_sub(start) < window.as_secs()).then_some((start, used.max(0) as u32))
    }))
}

#[async_trait]
impl QuotaLedger for SqliteQuota {
    async fn reserve(&self, user: &str, limit: u32, window: Duration) -> Result<Option<u64>> {
        let now = unix_now();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (start, used) = current(&tx, user, window, now)?.unwrap_or((now, 0));
        if used >= limit {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO quota (user, window_start, used) VALUES (?1, ?2, ?3)
             ON CONFLICT(user) DO UPDATE SET
                window_start = excluded.window_start,
                used = excluded.used",
            params![user, start as i64, used + 1],
        )?;
        tx.commit()?;
        Ok(Some(start))
    }

    async fn release(&self, user: &str, window_start: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE quota SET used = MAX(used - 1, 0)
             WHERE user = ?1 AND window_start = ?2",
            params![user, window_start as i64],
        )?;
        Ok(())
    }

    async fn usage(&self, user: &str, window: Duration) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        Ok(current(&conn, user, window, unix_now())?.map_or(0, |(_, used)| used))
    }
}
