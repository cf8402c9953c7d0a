//! Key-value configuration storage backed by SQLite, and the typed
//! [`Settings`] read out of it.
//!
//! Shares a database with [`SqliteCache`](crate::cache::sqlite::SqliteCache)
//! and [`SqliteQuota`](crate::quota::sqlite::SqliteQuota). Pass the same
//! path to all three.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

use crate::chain::ChainConfig;
use crate::consts::{
    DEFAULT_CACHE_TTL, DEFAULT_IQDB_MIN_SIMILARITY, DEFAULT_SAUCENAO_MIN_SIMILARITY,
};
use crate::quota::QuotaPolicy;

pub const CASCADE_ON_LOW_ACCURACY: &str = "chain.cascade_on_low_accuracy";
pub const CASCADE_ON_QUOTA_EXCEEDED: &str = "chain.cascade_on_quota_exceeded";
pub const CASCADE_ON_FAILURE: &str = "chain.cascade_on_failure";
pub const RUN_PERCEPTUAL: &str = "chain.run_perceptual";
pub const QUOTA_LIMIT: &str = "quota.limit";
pub const QUOTA_WINDOW_SECS: &str = "quota.window_secs";
pub const QUOTA_PRIVILEGED: &str = "quota.privileged";
pub const CACHE_TTL_SECS: &str = "cache.ttl_secs";
pub const SAUCENAO_MIN_SIMILARITY: &str = "saucenao.min_similarity";
pub const IQDB_MIN_SIMILARITY: &str = "iqdb.min_similarity";

/// Every key [`Settings::load`] understands.
pub const KNOWN_KEYS: &[&str] = &[
    CASCADE_ON_LOW_ACCURACY,
    CASCADE_ON_QUOTA_EXCEEDED,
    CASCADE_ON_FAILURE,
    RUN_PERCEPTUAL,
    QUOTA_LIMIT,
    QUOTA_WINDOW_SECS,
    QUOTA_PRIVILEGED,
    CACHE_TTL_SECS,
    SAUCENAO_MIN_SIMILARITY,
    IQDB_MIN_SIMILARITY,
];

/// Persistent key-value configuration store.
pub struct Config {
    conn: Mutex<Connection>,
}

impl Config {
    /// Open or create the config table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open config database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create config table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get a config value by key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Set a config value (upsert).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Remove a config key.
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Parse `key` as `T`, or fall back to `default` when unset.
    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key)? {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid value for {key} ({raw:?}): {e}")),
            None => Ok(default),
        }
    }
}

/// Engine tunables, read from [`Config`] with built-in defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub chain: ChainConfig,
    pub quota: QuotaPolicy,
    pub cache_ttl: Duration,
    pub saucenao_min_similarity: f64,
    pub iqdb_min_similarity: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            quota: QuotaPolicy::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            saucenao_min_similarity: DEFAULT_SAUCENAO_MIN_SIMILARITY,
            iqdb_min_similarity: DEFAULT_IQDB_MIN_SIMILARITY,
        }
    }
}

impl Settings {
    pub fn load(config: &Config) -> Result<Self> {
        let d = Settings::default();

        let chain = ChainConfig {
            cascade_on_low_accuracy: config
                .parsed(CASCADE_ON_LOW_ACCURACY, d.chain.cascade_on_low_accuracy)?,
            cascade_on_quota_exceeded: config
                .parsed(CASCADE_ON_QUOTA_EXCEEDED, d.chain.cascade_on_quota_exceeded)?,
            cascade_on_failure: config.parsed(CASCADE_ON_FAILURE, d.chain.cascade_on_failure)?,
            run_perceptual: config.parsed(RUN_PERCEPTUAL, d.chain.run_perceptual)?,
        };

        let privileged: HashSet<String> = config
            .get(QUOTA_PRIVILEGED)?
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let quota = QuotaPolicy {
            limit: config.parsed(QUOTA_LIMIT, d.quota.limit)?,
            window: Duration::from_secs(
                config.parsed(QUOTA_WINDOW_SECS, d.quota.window.as_secs())?,
            ),
            privileged,
        };

        let saucenao_min_similarity =
            percentage(config, SAUCENAO_MIN_SIMILARITY, d.saucenao_min_similarity)?;
        let iqdb_min_similarity = percentage(config, IQDB_MIN_SIMILARITY, d.iqdb_min_similarity)?;

        Ok(Self {
            chain,
            quota,
            cache_ttl: Duration::from_secs(config.parsed(CACHE_TTL_SECS, d.cache_ttl.as_secs())?),
            saucenao_min_similarity,
            iqdb_min_similarity,
        })
    }
}

fn percentage(config: &Config, key: &str, default: f64) -> Result<f64> {
    let value: f64 = config.parsed(key, default)?;
    if !(0.0..=100.0).contains(&value) {
        bail!("{key} must be between 0 and 100, got {value}");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_config() -> Config {
        Config::open(":memory:").unwrap()
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let config = mem_config();
        assert!(config.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn set_overwrites_existing() {
        let config = mem_config();
        config.set(QUOTA_LIMIT, "4").unwrap();
        config.set(QUOTA_LIMIT, "12").unwrap();
        assert_eq!(config.get(QUOTA_LIMIT).unwrap().unwrap(), "12");
    }

    #[test]
    fn remove_nonexistent_is_ok() {
        let config = mem_config();
        config.remove("nonexistent").unwrap();
    }

    #[test]
    fn empty_config_loads_defaults() {
        let settings = Settings::load(&mem_config()).unwrap();
        assert!(settings.chain.cascade_on_low_accuracy);
        assert!(!settings.chain.run_perceptual);
        assert_eq!(settings.quota.limit, 8);
        assert!(settings.quota.privileged.is_empty());
        assert_eq!(settings.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(settings.saucenao_min_similarity, DEFAULT_SAUCENAO_MIN_SIMILARITY);
        assert_eq!(settings.iqdb_min_similarity, DEFAULT_IQDB_MIN_SIMILARITY);
    }

    #[test]
    fn stored_values_override_defaults() {
        let config = mem_config();
        config.set(RUN_PERCEPTUAL, "true").unwrap();
        config.set(CASCADE_ON_FAILURE, "false").unwrap();
        config.set(QUOTA_LIMIT, "3").unwrap();
        config.set(QUOTA_WINDOW_SECS, "60").unwrap();
        config.set(QUOTA_PRIVILEGED, "admin, owner,,").unwrap();
        config.set(CACHE_TTL_SECS, "120").unwrap();
        config.set(SAUCENAO_MIN_SIMILARITY, "72.5").unwrap();
        config.set(IQDB_MIN_SIMILARITY, "90").unwrap();

        let settings = Settings::load(&config).unwrap();
        assert!(settings.chain.run_perceptual);
        assert!(!settings.chain.cascade_on_failure);
        assert_eq!(settings.quota.limit, 3);
        assert_eq!(settings.quota.window, Duration::from_secs(60));
        assert_eq!(
            settings.quota.privileged,
            HashSet::from(["admin".to_string(), "owner".to_string()])
        );
        assert_eq!(settings.cache_ttl, Duration::from_secs(120));
        assert_eq!(settings.saucenao_min_similarity, 72.5);
        assert_eq!(settings.iqdb_min_similarity, 90.0);
    }

    #[test]
    fn bad_value_names_the_key() {
        let config = mem_config();
        config.set(QUOTA_LIMIT, "lots").unwrap();
        let err = Settings::load(&config).unwrap_err();
        assert!(err.to_string().contains(QUOTA_LIMIT));
    }

    #[test]
    fn similarity_out_of_range_is_rejected() {
        let config = mem_config();
        config.set(SAUCENAO_MIN_SIMILARITY, "140").unwrap();
        assert!(Settings::load(&config).is_err());

        config.remove(SAUCENAO_MIN_SIMILARITY).unwrap();
        config.set(IQDB_MIN_SIMILARITY, "-1").unwrap();
        let err = Settings::load(&config).unwrap_err();
        assert!(err.to_string().contains(IQDB_MIN_SIMILARITY));
    }

    #[test]
    fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config-test.db");
        let path_str = path.to_str().unwrap();

        {
            let config = Config::open(path_str).unwrap();
            config.set(QUOTA_LIMIT, "5").unwrap();
        }

        {
            let config = Config::open(path_str).unwrap();
            assert_eq!(Settings::load(&config).unwrap().quota.limit, 5);
        }
    }
}
