use async_trait::async_trait;
use ember_rs_core::{Compactor, CompactorError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct FixedCompactor {
    response: String,
}

impl FixedCompactor {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl Compactor for FixedCompactor {
    async fn compact(
        &self,
        _old_document: &str,
        _transcript: &str,
    ) -> Result<String, CompactorError> {
        Ok(self.response.clone())
    }
}

/// One recorded compactor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactCall {
    pub old_document: String,
    pub transcript: String,
}

/// Answers with fixed text and records every call.
#[derive(Debug, Clone)]
pub struct RecordingCompactor {
    response: String,
    calls: Arc<Mutex<Vec<CompactCall>>>,
}

impl RecordingCompactor {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<CompactCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Compactor for RecordingCompactor {
    async fn compact(
        &self,
        old_document: &str,
        transcript: &str,
    ) -> Result<String, CompactorError> {
        self.calls.lock().push(CompactCall {
            old_document: old_document.to_string(),
            transcript: transcript.to_string(),
        });
        Ok(self.response.clone())
    }
}

/// Always fails, counting attempts.
#[derive(Debug, Clone, Default)]
pub struct FailingCompactor {
    attempts: Arc<Mutex<usize>>,
}

impl FailingCompactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Compactor for FailingCompactor {
    async fn compact(
        &self,
        _old_document: &str,
        _transcript: &str,
    ) -> Result<String, CompactorError> {
        *self.attempts.lock() += 1;
        Err(CompactorError::Other("compactor unavailable".to_string()))
    }
}

/// Parks every call until released, so tests can hold the worker busy.
#[derive(Debug, Clone)]
pub struct BlockingCompactor {
    response: String,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl BlockingCompactor {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// Resolves once a call has entered the compactor.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let one parked (or the next) call finish.
    pub fn release_one(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Compactor for BlockingCompactor {
    async fn compact(
        &self,
        _old_document: &str,
        _transcript: &str,
    ) -> Result<String, CompactorError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.response.clone())
    }
}
