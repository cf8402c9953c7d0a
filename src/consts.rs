//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

/// Requests per user allowed inside one quota window.
pub const DEFAULT_QUOTA_LIMIT: u32 = 8;

/// Length of a quota window.
pub const DEFAULT_QUOTA_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a finished search stays reusable.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// SauceNAO results below this similarity are flagged as low accuracy.
pub const DEFAULT_SAUCENAO_MIN_SIMILARITY: f64 = 60.0;

/// iqdb best matches below this similarity are flagged as low accuracy.
pub const DEFAULT_IQDB_MIN_SIMILARITY: f64 = 80.0;

/// Timeout applied to every backend HTTP request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

pub const USER_AGENT: &str = concat!("saucer/", env!("CARGO_PKG_VERSION"));

/// Default database path: `~/.saucer/saucer.db`.
/// Single DB for cache, quota ledger, and config.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".saucer")
        .join("saucer.db")
}

/// Seconds since the unix epoch. Clock errors collapse to zero.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
