//! In-flight deduplication.
//!
//! The first requester for a [`SearchKey`] becomes the primary and runs the
//! chain; later requesters join its session and are served by
//! [`RequestCoalescer::finish`]. The table lock is never held across an
//! await, so attach and finish are each one atomic step.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use futures::future::join_all;

use crate::image::{ImageRef, SearchKey};
use crate::message::Fragment;
use crate::requester::Requester;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// New session; the caller runs the chain.
    First,
    /// Added to a running session; the result will be delivered.
    Joined,
    /// This audience is already waiting on the key.
    AlreadyWaiting,
}

/// Fan-out tally from [`RequestCoalescer::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// A requester registered on a session, with how it asked.
#[derive(Clone)]
pub struct Waiter {
    pub requester: Arc<dyn Requester>,
    /// Asked to skip cached results.
    pub purge: bool,
}

impl Waiter {
    pub fn new(requester: Arc<dyn Requester>, purge: bool) -> Self {
        Self { requester, purge }
    }
}

/// Requesters waiting on one key. Index 0 is the primary.
struct Session {
    waiters: Vec<Waiter>,
}

#[derive(Default)]
pub struct RequestCoalescer {
    sessions: Mutex<HashMap<SearchKey, Session>>,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, key: &SearchKey, waiter: Waiter) -> Attach {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Session {
                    waiters: vec![waiter],
                });
                Attach::First
            }
            Entry::Occupied(mut slot) => {
                let audience = waiter.requester.audience();
                let session = slot.get_mut();
                if session
                    .waiters
                    .iter()
                    .any(|w| w.requester.audience() == audience)
                {
                    Attach::AlreadyWaiting
                } else {
                    session.waiters.push(waiter);
                    Attach::Joined
                }
            }
        }
    }

    /// Requesters registered for `key`, primary included. Zero if idle.
    pub fn waiters(&self, key: &SearchKey) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |s| s.waiters.len())
    }

    pub fn in_flight(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Close the session and deliver `messages` plus the searched image to
    /// every non-primary requester. One requester failing does not stop the
    /// others.
    pub async fn finish(
        &self,
        key: &SearchKey,
        messages: &[Fragment],
        image: &ImageRef,
    ) -> DeliveryReport {
        let joined = self.take(key);
        let deliveries = joined.iter().map(|w| async move {
            let requester = &w.requester;
            if !messages.is_empty() {
                requester.reply(messages).await?;
            }
            requester.reply_image(image).await
        });

        let mut report = DeliveryReport::default();
        for (waiter, result) in joined.iter().zip(join_all(deliveries).await) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        %key,
                        audience = ?waiter.requester.audience(),
                        error = %err,
                        "failed to deliver search result"
                    );
                }
            }
        }
        report
    }

    /// Close the session without delivering anything. Returns the
    /// non-primary waiters so the caller can serve them another way.
    pub fn abandon(&self, key: &SearchKey) -> Vec<Waiter> {
        self.take(key)
    }

    fn take(&self, key: &SearchKey) -> Vec<Waiter> {
        let session = self.sessions.lock().unwrap().remove(key);
        session
            .map(|s| s.waiters.into_iter().skip(1).collect())
            .unwrap_or_default()
    }
}
