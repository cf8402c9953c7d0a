use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::ResultCache;
use crate::consts::unix_now;
use crate::image::SearchKey;
use crate::message::Fragment;

/// SQLite-backed result cache. Rows past their TTL read as absent and are
/// swept by [`SqliteCache::purge_expired`].
pub struct SqliteCache {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl SqliteCache {
    pub fn open(path: &str, ttl: Duration) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open cache database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS search_cache (
                key        TEXT PRIMARY KEY,
                messages   TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .context("failed to create cache table")?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
        })
    }

    pub fn in_memory(ttl: Duration) -> Result<Self> {
        Self::open(":memory:", ttl)
    }

    /// Delete expired rows. Returns how many went.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM search_cache WHERE expires_at <= ?1",
            [unix_now() as i64],
        )?;
        Ok(n)
    }
}

#[async_trait]
impl ResultCache for SqliteCache {
    async fn get(&self, key: &SearchKey) -> Result<Option<Vec<Fragment>>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT messages FROM search_cache WHERE key = ?1 AND expires_at > ?2",
                params![key.to_string(), unix_now() as i64],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &SearchKey, messages: &[Fragment]) -> Result<()> {
        let json = serde_json::to_string(messages)?;
        let expires_at = unix_now().saturating_add(self.ttl.as_secs());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO search_cache (key, messages, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                messages = excluded.messages,
                expires_at = excluded.expires_at",
            params![key.to_string(), json, expires_at as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageRef, Selector};

    const DAY: Duration = Duration::from_secs(86_400);

    fn key(url: &str, selector: Selector) -> SearchKey {
        SearchKey::new(&ImageRef::from_url(url), selector)
    }

    fn messages() -> Vec<Fragment> {
        vec![
            Fragment::text("SauceNAO (93.1%)\nhttps://www.pixiv.net/artworks/1"),
            Fragment::image("https://img.example/thumb.jpg"),
        ]
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_key() {
        let cache = SqliteCache::in_memory(DAY).unwrap();
        assert!(cache.get(&key("a", Selector::All)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_get_returns_what_was_set() {
        let cache = SqliteCache::in_memory(DAY).unwrap();
        let k = key("a", Selector::All);
        cache.set(&k, &messages()).await.unwrap();

        for _ in 0..3 {
            assert_eq!(cache.get(&k).await.unwrap().unwrap(), messages());
        }
    }

    #[tokio::test]
    async fn selectors_are_cached_separately() {
        let cache = SqliteCache::in_memory(DAY).unwrap();
        cache.set(&key("a", Selector::All), &messages()).await.unwrap();
        assert!(
            cache
                .get(&key("a", Selector::Anime))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn set_overwrites_existing() {
        let cache = SqliteCache::in_memory(DAY).unwrap();
        let k = key("a", Selector::All);
        cache.set(&k, &messages()).await.unwrap();
        cache.set(&k, &[Fragment::text("fresh")]).await.unwrap();
        assert_eq!(
            cache.get(&k).await.unwrap().unwrap(),
            vec![Fragment::text("fresh")]
        );
    }

    #[tokio::test]
    async fn zero_ttl_entries_are_never_served() {
        let cache = SqliteCache::in_memory(Duration::ZERO).unwrap();
        let k = key("a", Selector::All);
        cache.set(&k, &messages()).await.unwrap();
        assert!(cache.get(&k).await.unwrap().is_none());
        assert_eq!(cache.purge_expired().unwrap(), 1);
    }

    #[tokio::test]
    async fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache-test.db");
        let path_str = path.to_str().unwrap();
        let k = key("a", Selector::Pixiv);

        {
            let cache = SqliteCache::open(path_str, DAY).unwrap();
            cache.set(&k, &messages()).await.unwrap();
        }

        {
            let cache = SqliteCache::open(path_str, DAY).unwrap();
            assert_eq!(cache.get(&k).await.unwrap().unwrap(), messages());
        }
    }
}
