use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{Engine, ImageOutcome, SearchRequest};
use crate::cache::ResultCache;
use crate::chain::{ProviderChain, StepSink};
use crate::coalesce::{Attach, RequestCoalescer, Waiter};
use crate::image::{ImageRef, SearchKey, Selector};
use crate::message::Fragment;
use crate::quota::{QuotaManager, Reservation};
use crate::requester::Requester;

/// Cache, coalescer, quota and provider chain wired into one pipeline.
pub struct SearchEngine {
    shared: Arc<Shared>,
}

/// Everything a search needs. Behind an `Arc` so cleanup of a dropped
/// search can outlive the caller.
struct Shared {
    chain: ProviderChain,
    cache: Arc<dyn ResultCache>,
    quota: QuotaManager,
    coalescer: RequestCoalescer,
}

impl SearchEngine {
    pub fn new(chain: ProviderChain, cache: Arc<dyn ResultCache>, quota: QuotaManager) -> Self {
        Self {
            shared: Arc::new(Shared {
                chain,
                cache,
                quota,
                coalescer: RequestCoalescer::new(),
            }),
        }
    }

    pub fn coalescer(&self) -> &RequestCoalescer {
        &self.shared.coalescer
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.shared.quota
    }
}

impl Shared {
    async fn search_image(
        self: &Arc<Self>,
        image: &ImageRef,
        selector: Selector,
        waiter: &Waiter,
    ) -> Result<ImageOutcome> {
        let key = SearchKey::new(image, selector);
        let requester = &waiter.requester;

        if !waiter.purge && let Some(cached) = self.cache.get(&key).await? {
            tracing::info!(%key, "cache hit");
            deliver(requester, &cached, image).await;
            return Ok(ImageOutcome::Cached);
        }

        match self.coalescer.attach(&key, waiter.clone()) {
            Attach::First => {}
            Attach::Joined => {
                tracing::debug!(%key, "joined running search");
                return Ok(ImageOutcome::Joined);
            }
            Attach::AlreadyWaiting => return Ok(ImageOutcome::AlreadyWaiting),
        }
        let mut guard = SessionGuard {
            shared: Arc::clone(self),
            key: key.clone(),
            image: image.clone(),
            selector,
            reservation: None,
            armed: true,
        };

        let user = requester.user_id();
        let reservation = match self.quota.reserve(user).await {
            Ok(Some(reservation)) => reservation,
            Ok(None) => {
                let handover = self.hand_over(image.clone(), selector, guard.abandon(), None);
                let notice = format!(
                    "Search limit reached ({} per period). Try again later.",
                    self.quota.limit()
                );
                if let Err(err) = requester.reply(&[Fragment::text(notice)]).await {
                    tracing::warn!(user, error = %err, "failed to report quota denial");
                }
                wait_for(handover).await;
                return Ok(ImageOutcome::QuotaDenied);
            }
            Err(err) => {
                let handover = self.hand_over(image.clone(), selector, guard.abandon(), None);
                wait_for(handover).await;
                return Err(err);
            }
        };
        guard.reservation = Some(reservation);

        let stream = PrimaryStream {
            coalescer: &self.coalescer,
            key: &key,
            requester,
            sent: AtomicUsize::new(0),
            live: AtomicBool::new(true),
        };
        let outcome = self.chain.run(image, selector, Some(&stream)).await;

        if outcome.has_succeeded {
            // Paid for; a drop from here on must not refund it.
            guard.reservation = None;
            if let Err(err) = self.cache.set(&key, &outcome.messages).await {
                tracing::warn!(%key, error = %err, "failed to cache search result");
            }
        }

        let sent = stream.sent.load(Ordering::SeqCst);
        deliver(requester, &outcome.messages[sent..], image).await;
        let report = self.coalescer.finish(&key, &outcome.messages, image).await;
        tracing::debug!(%key, delivered = report.delivered, failed = report.failed, "fan-out done");

        if let Some(reservation) = guard.disarm()
            && let Err(err) = self.quota.release(&reservation).await
        {
            tracing::error!(user, error = %err, "failed to release quota");
        }

        Ok(ImageOutcome::Searched {
            succeeded: outcome.has_succeeded,
        })
    }

    /// The primary cannot finish. Refund its unit if given one, and let the
    /// requesters that joined it start over, so one of them becomes the new
    /// primary under its own budget. Runs as its own task so it completes
    /// even when the primary's caller goes away.
    fn hand_over(
        self: &Arc<Self>,
        image: ImageRef,
        selector: Selector,
        waiting: Vec<Waiter>,
        refund: Option<Reservation>,
    ) -> Option<JoinHandle<()>> {
        if waiting.is_empty() && refund.is_none() {
            return None;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::error!(
                fingerprint = image.fingerprint(),
                waiting = waiting.len(),
                "no runtime to hand the search over on"
            );
            return None;
        };
        let shared = Arc::clone(self);
        Some(runtime.spawn(async move {
            if let Some(reservation) = refund
                && let Err(err) = shared.quota.release(&reservation).await
            {
                tracing::error!(user = reservation.user(), error = %err, "failed to release quota");
            }
            if waiting.is_empty() {
                return;
            }
            tracing::info!(
                fingerprint = image.fingerprint(),
                waiting = waiting.len(),
                "primary cannot search, handing over"
            );
            let retries = waiting
                .iter()
                .map(|w| shared.search_image(&image, selector, w));
            for result in join_all(retries).await {
                if let Err(err) = result {
                    tracing::warn!(fingerprint = image.fingerprint(), error = %err, "handed-over search failed");
                }
            }
        }))
    }
}

async fn wait_for(handover: Option<JoinHandle<()>>) {
    if let Some(handle) = handover
        && let Err(err) = handle.await
    {
        tracing::error!(error = %err, "hand-over task failed");
    }
}

/// Owned by the primary while its session is open. If the primary's future
/// is dropped first, the session is closed, whoever joined is handed over,
/// and a unit reserved for a search that never finished is refunded.
struct SessionGuard {
    shared: Arc<Shared>,
    key: SearchKey,
    image: ImageRef,
    selector: Selector,
    reservation: Option<Reservation>,
    armed: bool,
}

impl SessionGuard {
    /// Close the session here and now. Returns the joined waiters.
    fn abandon(&mut self) -> Vec<Waiter> {
        self.armed = false;
        self.reservation = None;
        self.shared.coalescer.abandon(&self.key)
    }

    /// The session was finished normally. Returns the reservation still
    /// owed a refund, if any.
    fn disarm(&mut self) -> Option<Reservation> {
        self.armed = false;
        self.reservation.take()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiting = self.shared.coalescer.abandon(&self.key);
        tracing::warn!(key = %self.key, waiting = waiting.len(), "search dropped before it finished");
        let _ = self.shared.hand_over(
            self.image.clone(),
            self.selector,
            waiting,
            self.reservation.take(),
        );
    }
}

#[async_trait]
impl Engine for SearchEngine {
    async fn search(&self, request: SearchRequest) -> Result<Vec<ImageOutcome>> {
        let waiter = Waiter::new(request.requester, request.purge);
        let mut outcomes = Vec::with_capacity(request.images.len());
        for image in &request.images {
            let outcome = self
                .shared
                .search_image(image, request.selector, &waiter)
                .await?;
            outcomes.push(outcome);
            if outcome == ImageOutcome::QuotaDenied {
                break;
            }
        }
        outcomes.resize(request.images.len(), ImageOutcome::Skipped);
        Ok(outcomes)
    }
}

/// Send fragments then the terminal image. Failures are logged; the
/// requester is on its own.
async fn deliver(requester: &Arc<dyn Requester>, fragments: &[Fragment], image: &ImageRef) {
    let mut result = Ok(());
    if !fragments.is_empty() {
        result = requester.reply(fragments).await;
    }
    if result.is_ok() {
        result = requester.reply_image(image).await;
    }
    if let Err(err) = result {
        tracing::warn!(audience = ?requester.audience(), error = %err, "failed to deliver search result");
    }
}

/// Streams each backend's fragments to the primary while nobody else is
/// waiting. Once someone joins, the rest is held back and sent in one piece
/// with everyone else's, so `sent` always covers a prefix of the result.
struct PrimaryStream<'a> {
    coalescer: &'a RequestCoalescer,
    key: &'a SearchKey,
    requester: &'a Arc<dyn Requester>,
    sent: AtomicUsize,
    live: AtomicBool,
}

#[async_trait]
impl StepSink for PrimaryStream<'_> {
    async fn step(&self, fragments: &[Fragment]) {
        if fragments.is_empty() || !self.live.load(Ordering::SeqCst) {
            return;
        }
        if self.coalescer.waiters(self.key) > 1 {
            self.live.store(false, Ordering::SeqCst);
            return;
        }
        match self.requester.reply(fragments).await {
            Ok(()) => {
                self.sent.fetch_add(fragments.len(), Ordering::SeqCst);
            }
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "interim reply failed");
                self.live.store(false, Ordering::SeqCst);
            }
        }
    }
}
