//! Error types for config loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned while loading or validating an Ember config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config {origin} is not valid JSON5: {source}")]
    ParseFailed {
        origin: String,
        source: json5::Error,
    },
    /// The merged layers do not decode into the config model.
    #[error("config does not match the model: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    /// A specific field failed schema or range validation.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
}
