//! Layered configuration loader.
//!
//! Discovers configuration layers (user, cwd, runtime overrides), validates
//! schema, merges them and applies the credential override from the
//! environment to produce a final `EmberConfig`.

mod layer_io;
mod merge;
mod schema;


use crate::{ConfigError, EmberConfig};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "ember.json5";
/// Default config directory under the home directory.
const DEFAULT_CONFIG_DIR: &str = ".ember";
/// Environment variable that overrides `device.api_key`.
pub const API_KEY_ENV: &str = "EMBER_API_KEY";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: EmberConfig,
    /// Metadata for each layer considered during load.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// User-specific configuration.
    User,
    /// Current working directory configuration.
    Cwd,
    /// Runtime overrides passed explicitly.
    Runtime,
    /// Credential taken from the environment (highest precedence).
    Env,
}

/// Metadata about a config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer origin.
    pub source: ConfigLayerSource,
    /// Location on disk if present.
    pub path: Option<PathBuf>,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to find the cwd layer.
    pub cwd: PathBuf,
    /// Optional user config path (defaults to `~/.ember/ember.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Runtime override config paths applied after the file layers.
    pub runtime_paths: Vec<PathBuf>,
    /// Credential override applied last.
    pub api_key_override: Option<String>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    ///
    /// The credential override is read from `EMBER_API_KEY` when set.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            user_config_path: layer_io::default_user_config_path(),
            runtime_paths: Vec::new(),
            api_key_override: std::env::var(API_KEY_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }

    /// Add a runtime override config path that is applied after file layers.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl EmberConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let path = path.as_ref();
        let contents = layer_io::read_config_file(path)?;
        let value = layer_io::parse_json5(&contents, &path.display().to_string())?;
        config_from_value(value, "config")
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value = layer_io::parse_json5(contents, "contents")?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        info!(
            "loading layered config with defaults (cwd={})",
            cwd.as_ref().display()
        );
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations and overrides.
    ///
    /// Layer precedence (low -> high): user, cwd, runtime overrides, env credential.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let mut layers = Vec::new();
        let mut merged = Value::Object(serde_json::Map::new());
        let mut seen_paths = HashSet::new();

        let cwd_path = options.cwd.join(DEFAULT_CONFIG_FILE);
        for (source, path) in [
            (ConfigLayerSource::User, options.user_config_path.as_deref()),
            (ConfigLayerSource::Cwd, Some(cwd_path.as_path())),
        ] {
            let Some(layer) = layer_io::load_optional_layer(source, path)? else {
                continue;
            };
            if let Some(path) = &layer.meta.path
                && !seen_paths.insert(layer_io::unique_path(path))
            {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            debug!("loaded {:?} layer", source);
            merge::merge_json_values(&mut merged, &layer.value);
            layers.push(layer.meta);
        }

        for runtime_path in &options.runtime_paths {
            let loaded = layer_io::load_required_layer(ConfigLayerSource::Runtime, runtime_path)?;
            debug!("loaded runtime layer (path={})", runtime_path.display());
            merge::merge_json_values(&mut merged, &loaded.value);
            layers.push(loaded.meta);
        }

        let mut config = config_from_value(merged, "effective")?;
        if let Some(api_key) = options.api_key_override {
            debug!("applying credential override from {API_KEY_ENV}");
            config.device.api_key = Some(api_key);
            layers.push(ConfigLayer {
                source: ConfigLayerSource::Env,
                path: None,
            });
        }
        if config.device.credential().is_none() {
            warn!("no device credential configured; compaction will be disabled");
        }
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.max_backups == 0 {
            return Err(invalid("storage.max_backups", "must be at least 1"));
        }
        if self.storage.partition_bytes == 0 {
            return Err(invalid("storage.partition_bytes", "must be greater than 0"));
        }
        if self.buffer.max_messages == 0 {
            return Err(invalid("buffer.max_messages", "must be greater than 0"));
        }
        if self.buffer.max_size_bytes == 0 {
            return Err(invalid("buffer.max_size_bytes", "must be greater than 0"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(invalid("pipeline.queue_capacity", "must be greater than 0"));
        }
        if self.pipeline.compaction_threshold == 0
            || self.pipeline.compaction_threshold > self.buffer.max_messages
        {
            return Err(invalid(
                "pipeline.compaction_threshold",
                "must be between 1 and buffer.max_messages",
            ));
        }
        if self.pipeline.target_document_bytes > self.pipeline.max_document_bytes {
            return Err(invalid(
                "pipeline.target_document_bytes",
                "must not exceed pipeline.max_document_bytes",
            ));
        }
        if !(0.0..=2.0).contains(&self.compactor.temperature) {
            return Err(invalid("compactor.temperature", "must be within [0, 2]"));
        }
        if self.compactor.timeout_secs == 0 {
            return Err(invalid("compactor.timeout_secs", "must be greater than 0"));
        }
        Ok(())
    }

    /// Directory the durable store lives in.
    ///
    /// Falls back to the platform data directory, then to `./ember-data`.
    pub fn storage_root(&self) -> PathBuf {
        if let Some(root) = &self.storage.root {
            return PathBuf::from(root);
        }
        layer_io::default_data_dir().unwrap_or_else(|| PathBuf::from("ember-data"))
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<EmberConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: EmberConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

fn invalid(path: &str, message: &str) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_string(),
        message: message.to_string(),
    }
}
