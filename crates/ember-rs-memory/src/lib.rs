//! Conversation buffer, memory document model and the versioned durable store.

pub mod buffer;
pub mod error;
pub mod medium;
pub mod model;
pub mod store;

/// Bounded conversation buffer.
pub use buffer::{BufferLimits, ConversationBuffer};
/// Memory error types.
pub use error::{MemoryError, StoreError};
/// Storage media.
pub use medium::{DirMedium, FlashMedium, MemoryMedium};
/// Document model.
pub use model::{
    MemoryDocument, MemoryItem, MemoryKind, Metadata, Preference, RecentContext, Role, Turn,
    UserProfile,
};
/// Durable store with rolling backups.
pub use store::{ACTIVE_KEY, DEFAULT_MAX_BACKUPS, DurableStore, backup_key};
