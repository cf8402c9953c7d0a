pub mod search;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::image::{ImageRef, Selector};
use crate::requester::Requester;

/// One incoming ask: some pictures, a selector, and who to answer.
pub struct SearchRequest {
    pub images: Vec<ImageRef>,
    pub selector: Selector,
    pub requester: Arc<dyn Requester>,
    /// Ignore cached results and search again.
    pub purge: bool,
}

/// What happened to one image of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Served from cache; no backend was called.
    Cached,
    /// This request ran the chain.
    Searched { succeeded: bool },
    /// Another request is already searching; the result will arrive from it.
    Joined,
    /// This conversation is already waiting on the same search.
    AlreadyWaiting,
    /// The requester is out of budget. Reported once per request.
    QuotaDenied,
    /// Not attempted because an earlier image was denied.
    Skipped,
}

/// The outermost boundary. The chat layer only knows this trait.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<ImageOutcome>>;
}
