//! Error types for memory documents and the durable store.

/// Errors returned by the document model and buffer helpers.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A role string other than user/assistant.
    #[error("unknown role: {0}")]
    UnknownRole(String),
    /// A document violated a field invariant.
    #[error("invalid memory document: {0}")]
    InvalidDocument(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors returned by the flash medium and durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The active document exists but cannot be parsed.
    #[error("active memory document is corrupt: {0}")]
    Corrupt(String),
    /// A write would exceed the partition capacity.
    #[error("not enough space on medium (needed={needed}, free={free})")]
    NoSpace { needed: u64, free: u64 },
    /// Backup version outside `1..=max`.
    #[error("invalid backup version {version} (max={max})")]
    InvalidBackupVersion { version: usize, max: usize },
    /// The requested backup slot is empty.
    #[error("backup {0} not found")]
    BackupNotFound(usize),
    /// Backing up the active document failed, so the write was not attempted.
    #[error("backup failed: {0}")]
    BackupFailed(Box<StoreError>),
}
