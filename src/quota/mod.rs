pub mod sqlite;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::consts::{DEFAULT_QUOTA_LIMIT, DEFAULT_QUOTA_WINDOW};

/// Durable per-user counters. Could be SQLite, Redis, etc.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Take one unit if `user` has fewer than `limit` in the current window.
    /// A window older than `window` starts over. Returns the start of the
    /// window the unit was taken from, or `None` when denied.
    async fn reserve(&self, user: &str, limit: u32, window: Duration) -> Result<Option<u64>>;
    /// Give back one unit taken from the window starting at `window_start`.
    /// A unit from a window that has since been replaced is not refunded.
    /// Never goes below zero.
    async fn release(&self, user: &str, window_start: u64) -> Result<()>;
    /// Units used in the current window.
    async fn usage(&self, user: &str, window: Duration) -> Result<u32>;
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub limit: u32,
    pub window: Duration,
    /// Users that are never counted.
    pub privileged: HashSet<String>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUOTA_LIMIT,
            window: DEFAULT_QUOTA_WINDOW,
            privileged: HashSet::new(),
        }
    }
}

/// One granted unit, handed back to [`QuotaManager::release`] if the search
/// it paid for fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    user: String,
    /// `None` for privileged users, who are never charged.
    window_start: Option<u64>,
}

impl Reservation {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_charged(&self) -> bool {
        self.window_start.is_some()
    }
}

/// Per-user request budget on top of a [`QuotaLedger`].
pub struct QuotaManager {
    ledger: Arc<dyn QuotaLedger>,
    policy: QuotaPolicy,
}

impl QuotaManager {
    pub fn new(ledger: Arc<dyn QuotaLedger>, policy: QuotaPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn is_privileged(&self, user: &str) -> bool {
        self.policy.privileged.contains(user)
    }

    /// `None` when `user` has spent the budget.
    pub async fn reserve(&self, user: &str) -> Result<Option<Reservation>> {
        if self.is_privileged(user) {
            return Ok(Some(Reservation {
                user: user.to_string(),
                window_start: None,
            }));
        }
        let granted = self
            .ledger
            .reserve(user, self.policy.limit, self.policy.window)
            .await?;
        if granted.is_none() {
            tracing::info!(user, limit = self.policy.limit, "quota exhausted");
        }
        Ok(granted.map(|start| Reservation {
            user: user.to_string(),
            window_start: Some(start),
        }))
    }

    /// Undo one [`reserve`](Self::reserve).
    pub async fn release(&self, reservation: &Reservation) -> Result<()> {
        match reservation.window_start {
            Some(start) => self.ledger.release(&reservation.user, start).await,
            None => Ok(()),
        }
    }

    pub async fn usage(&self, user: &str) -> Result<u32> {
        self.ledger.usage(user, self.policy.window).await
    }

    pub fn limit(&self) -> u32 {
        self.policy.limit
    }
}
