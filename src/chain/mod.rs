//! Which backends run for one image, and in what order.
//!
//! The default chain starts with generic similarity search and cascades to
//! feature matching when the first answer is weak, refused or missing. The
//! perceptual-hash backend can tag along after that. Forced selectors run a
//! single backend, and the animation backend always runs alone.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{Backend, ProviderResult};
use crate::image::{ImageRef, Selector};
use crate::message::Fragment;
use crate::retry::RetryExecutor;

/// Cascade switches. Each condition is independent.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Weak similarity match under `all` or `pixiv`.
    pub cascade_on_low_accuracy: bool,
    pub cascade_on_quota_exceeded: bool,
    pub cascade_on_failure: bool,
    /// Also ask the perceptual-hash backend in the default chain.
    pub run_perceptual: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            cascade_on_low_accuracy: true,
            cascade_on_quota_exceeded: true,
            cascade_on_failure: true,
            run_perceptual: false,
        }
    }
}

/// The four backend slots.
#[derive(Clone)]
pub struct Backends {
    pub similarity: Arc<dyn Backend>,
    pub feature: Arc<dyn Backend>,
    pub perceptual: Arc<dyn Backend>,
    pub anime: Arc<dyn Backend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Similarity,
    Feature,
    Perceptual,
    Anime,
}

/// How a selector is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Forced(Role),
    Default,
}

impl Plan {
    pub fn for_selector(selector: Selector) -> Self {
        match selector {
            Selector::Anime => Plan::Forced(Role::Anime),
            Selector::Ascii2d => Plan::Forced(Role::Feature),
            Selector::Iqdb => Plan::Forced(Role::Perceptual),
            Selector::All | Selector::Pixiv | Selector::Danbooru | Selector::Doujin => {
                Plan::Default
            }
        }
    }
}

/// Receives each backend's fragments as soon as that backend is done.
#[async_trait]
pub trait StepSink: Send + Sync {
    async fn step(&self, fragments: &[Fragment]);
}

/// Everything one chain run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainOutcome {
    pub messages: Vec<Fragment>,
    /// True if any attempted backend succeeded.
    pub has_succeeded: bool,
}

pub struct ProviderChain {
    backends: Backends,
    config: ChainConfig,
    retry: RetryExecutor,
}

impl ProviderChain {
    pub fn new(backends: Backends, config: ChainConfig) -> Self {
        Self {
            backends,
            config,
            retry: RetryExecutor::smart(),
        }
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub async fn run(
        &self,
        image: &ImageRef,
        selector: Selector,
        sink: Option<&dyn StepSink>,
    ) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        match Plan::for_selector(selector) {
            Plan::Forced(role) => {
                let result = self.invoke(role, image, selector).await;
                record(&mut outcome, result, sink).await;
            }
            Plan::Default => {
                let primary = self.invoke(Role::Similarity, image, selector).await;
                let cascade = self.should_cascade(selector, &primary);
                record(&mut outcome, primary, sink).await;

                if cascade {
                    let feature = self.invoke(Role::Feature, image, selector).await;
                    record(&mut outcome, feature, sink).await;
                }
                if self.config.run_perceptual {
                    let extra = self.invoke(Role::Perceptual, image, selector).await;
                    record(&mut outcome, extra, sink).await;
                }
            }
        }

        tracing::info!(
            fingerprint = image.fingerprint(),
            %selector,
            succeeded = outcome.has_succeeded,
            fragments = outcome.messages.len(),
            "chain finished"
        );
        outcome
    }

    /// Whether the similarity result warrants asking the feature backend.
    pub fn should_cascade(&self, selector: Selector, result: &ProviderResult) -> bool {
        if result.success {
            result.low_accuracy
                && self.config.cascade_on_low_accuracy
                && matches!(selector, Selector::All | Selector::Pixiv)
        } else if result.quota_exceeded {
            self.config.cascade_on_quota_exceeded
        } else {
            self.config.cascade_on_failure
        }
    }

    fn backend(&self, role: Role) -> &Arc<dyn Backend> {
        match role {
            Role::Similarity => &self.backends.similarity,
            Role::Feature => &self.backends.feature,
            Role::Perceptual => &self.backends.perceptual,
            Role::Anime => &self.backends.anime,
        }
    }

    /// One backend call, retried on transport errors. Never fails: errors
    /// come back as an unsuccessful result.
    async fn invoke(&self, role: Role, image: &ImageRef, selector: Selector) -> ProviderResult {
        let backend = self.backend(role);
        tracing::debug!(backend = backend.name(), ?role, "invoking backend");

        match self
            .retry
            .run_transient(|| backend.search(image, selector))
            .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(backend = backend.name(), error = %err, "backend failed");
                ProviderResult {
                    quota_exceeded: err.is_rate_limited(),
                    messages: vec![Fragment::text(format!("{} failed: {err}", backend.name()))],
                    ..ProviderResult::default()
                }
            }
        }
    }
}

async fn record(outcome: &mut ChainOutcome, result: ProviderResult, sink: Option<&dyn StepSink>) {
    let mut step = result.messages;
    if let Some(warning) = result.warning {
        step.push(Fragment::text(warning));
    }
    outcome.has_succeeded |= result.success;
    if let Some(sink) = sink {
        sink.step(&step).await;
    }
    outcome.messages.extend(step);
}
