//! Error types for the compaction pipeline and its collaborators.

use ember_rs_memory::{MemoryError, StoreError};
use thiserror::Error;

/// Errors returned by a [`Compactor`](crate::Compactor).
#[derive(Debug, Error)]
pub enum CompactorError {
    /// The request never produced a response (connect, timeout, decode).
    #[error("compactor transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("compactor returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response carried no content.
    #[error("compactor returned an empty response")]
    EmptyResponse,
    /// The response envelope did not have the expected shape.
    #[error("malformed compactor response: {0}")]
    Malformed(String),
    /// No device credential is configured.
    #[error("compactor credential is not configured")]
    MissingCredential,
    /// Any other compactor failure.
    #[error("compactor failed: {0}")]
    Other(String),
}

/// Reasons a compactor candidate is rejected before it reaches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("candidate document is empty")]
    Empty,
    #[error("candidate is not a memory document: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("candidate violates document invariants: {0}")]
    Invalid(#[source] MemoryError),
    #[error("candidate is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

/// Errors returned by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The ingestion queue stayed full for the whole enqueue timeout.
    #[error("ingestion queue full, turn dropped")]
    QueueFull,
    #[error(transparent)]
    Compactor(#[from] CompactorError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("document error: {0}")]
    Memory(#[from] MemoryError),
    /// The background worker has exited.
    #[error("memory worker stopped")]
    WorkerStopped,
}

/// Errors returned while assembling the memory service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Compaction needs a device credential and none is configured.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("compactor error: {0}")]
    Compactor(#[from] CompactorError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}
