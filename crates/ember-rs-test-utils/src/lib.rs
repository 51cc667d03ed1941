//! Test helpers shared across Ember crates.

pub mod compactor;
pub mod fixtures;
pub mod medium;

pub use compactor::{BlockingCompactor, FailingCompactor, FixedCompactor, RecordingCompactor};
pub use fixtures::{oversized_document_json, sample_document, sample_document_json};
pub use medium::FaultyMedium;
