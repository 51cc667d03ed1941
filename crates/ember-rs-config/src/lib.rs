//! Configuration models and layered config loading.
//!
//! This crate owns the Ember config schema, validation, and layer-merging
//! logic used by the memory service and the CLI.

mod error;
mod loader;
mod model;

/// Public error type returned by config loading and validation APIs.
pub use error::ConfigError;
/// Layered config types and loader options.
pub use loader::{
    API_KEY_ENV, ConfigLayer, ConfigLayerSource, LayeredConfig, LayeredConfigOptions,
};
/// Configuration schema models.
pub use model::*;
