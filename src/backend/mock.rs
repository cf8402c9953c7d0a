use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{Notify, Semaphore};

use super::{Backend, ProviderResult};
use crate::error::BackendError;
use crate::image::{ImageRef, Selector};

/// One scripted answer. [`BackendError`] is not `Clone`, so errors are
/// described and built on demand.
#[derive(Debug, Clone)]
pub enum Scripted {
    Result(ProviderResult),
    ConnectionReset,
    Status(u16),
    Parse(String),
}

impl Scripted {
    fn build(&self) -> Result<ProviderResult, BackendError> {
        match self {
            Scripted::Result(r) => Ok(r.clone()),
            Scripted::ConnectionReset => Err(BackendError::ConnectionReset),
            Scripted::Status(code) => Err(BackendError::Status {
                status: StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                body: String::new(),
            }),
            Scripted::Parse(msg) => Err(BackendError::Parse(msg.clone())),
        }
    }
}

/// A scripted backend for tests. Answers in order; once the script runs out
/// the last answer repeats.
pub struct MockBackend {
    name: String,
    script: Vec<Scripted>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl MockBackend {
    pub fn new(name: &str, script: Vec<Scripted>) -> Self {
        Self {
            name: name.to_string(),
            script,
            calls: AtomicUsize::new(0),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    /// Always answer with `result`.
    pub fn always(name: &str, result: ProviderResult) -> Self {
        Self::new(name, vec![Scripted::Result(result)])
    }

    /// Hold every call until the gate hands out a permit.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Notified each time a call starts.
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        _image: &ImageRef,
        _selector: Selector,
    ) -> Result<ProviderResult, BackendError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| BackendError::Config("mock gate closed".to_string()))?;
            permit.forget();
        }

        let entry = self
            .script
            .get(i)
            .or_else(|| self.script.last())
            .ok_or_else(|| BackendError::Config(format!("{}: empty script", self.name)))?;
        entry.build()
    }
}
