//! Compaction pipeline for Ember long-term memory.
//!
//! This crate owns the compactor client, candidate validation, the background
//! worker that turns buffered conversation into committed memory, and the
//! service that wires them to a durable store.

pub mod compactor;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod validation;

/// Compactor trait and the chat-completions implementation.
pub use compactor::{ChatCompactor, Compactor, build_prompt};
/// Error types.
pub use error::{CompactorError, PipelineError, ServiceError, ValidationError};
/// Pipeline handles and reports.
pub use pipeline::{
    BufferStats, CompactionOutcome, CompactionReport, MemoryPipeline, PipelineSettings,
    WorkerHandle,
};
/// Composition root.
pub use service::{MemoryService, MemoryStatus};
/// Candidate checks.
pub use validation::{strip_code_fences, validate_candidate};
