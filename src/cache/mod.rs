pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::image::SearchKey;
use crate::message::Fragment;

/// Finished searches, keyed by what was searched. Entries are only ever
/// written for successful runs, so a later failure never replaces one.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &SearchKey) -> Result<Option<Vec<Fragment>>>;
    async fn set(&self, key: &SearchKey, messages: &[Fragment]) -> Result<()>;
}
