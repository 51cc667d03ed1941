//! Configuration schema for Ember.

use serde::{Deserialize, Serialize};

/// Root config for the Ember memory service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmberConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub compactor: CompactorConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl EmberConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> EmberConfigBuilder {
        EmberConfigBuilder::new()
    }
}

/// Builder for assembling an `EmberConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct EmberConfigBuilder {
    config: EmberConfig,
}

impl EmberConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: EmberConfig::default(),
        }
    }

    /// Replace the storage configuration.
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Replace the conversation buffer limits.
    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    /// Replace the compaction pipeline configuration.
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.config.pipeline = pipeline;
        self
    }

    /// Replace the compactor client configuration.
    pub fn compactor(mut self, compactor: CompactorConfig) -> Self {
        self.config.compactor = compactor;
        self
    }

    /// Set the device credential used to authenticate the compactor.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.device.api_key = Some(api_key.into());
        self
    }

    /// Finalize and return the built `EmberConfig`.
    pub fn build(self) -> EmberConfig {
        self.config
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the active document and its backups.
    #[serde(default)]
    pub root: Option<String>,
    /// Size of the emulated flash partition in bytes.
    #[serde(default = "default_partition_bytes")]
    pub partition_bytes: u64,
    /// Number of rolling backups kept behind the active document.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            partition_bytes: default_partition_bytes(),
            max_backups: default_max_backups(),
        }
    }
}

/// Default partition size (1 MiB).
fn default_partition_bytes() -> u64 {
    1024 * 1024
}

/// Default backup retention depth.
fn default_max_backups() -> usize {
    3
}

/// Conversation buffer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

/// Default maximum number of buffered turns.
fn default_max_messages() -> usize {
    20
}

/// Default maximum estimated buffer size in bytes.
fn default_max_size_bytes() -> usize {
    10 * 1024
}

/// Compaction pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the ingestion queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long an enqueue may wait for queue space before the turn is dropped.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Buffered turn count that fires a compaction.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
    /// Hard cap on the serialized memory document.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    /// Size the compactor is asked to stay under.
    #[serde(default = "default_target_document_bytes")]
    pub target_document_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            compaction_threshold: default_compaction_threshold(),
            max_document_bytes: default_max_document_bytes(),
            target_document_bytes: default_target_document_bytes(),
        }
    }
}

fn default_queue_capacity() -> usize {
    5
}

fn default_enqueue_timeout_ms() -> u64 {
    100
}

fn default_compaction_threshold() -> usize {
    10
}

fn default_max_document_bytes() -> usize {
    10 * 1024
}

fn default_target_document_bytes() -> usize {
    5 * 1024
}

/// Chat-completions client used as the compactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    #[serde(default = "default_compactor_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_compactor_model")]
    pub model: String,
    #[serde(default = "default_compactor_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_compactor_temperature")]
    pub temperature: f32,
    #[serde(default = "default_compactor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_compactor_endpoint(),
            model: default_compactor_model(),
            max_tokens: default_compactor_max_tokens(),
            temperature: default_compactor_temperature(),
            timeout_secs: default_compactor_timeout_secs(),
        }
    }
}

/// Default chat-completions endpoint.
fn default_compactor_endpoint() -> String {
    "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string()
}

/// Default model identifier.
fn default_compactor_model() -> String {
    "glm-4.7-flash".to_string()
}

fn default_compactor_max_tokens() -> u32 {
    4096
}

fn default_compactor_temperature() -> f32 {
    0.7
}

/// Default request timeout for a compaction round trip.
fn default_compactor_timeout_secs() -> u64 {
    60
}

/// Device-provisioned settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

impl DeviceConfig {
    /// Return the configured credential, ignoring blank values.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}
