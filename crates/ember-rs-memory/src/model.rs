//! Conversation turns and the long-term memory document.

use crate::error::MemoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Fixed per-turn overhead added to the byte estimate of a buffered turn.
pub const TURN_OVERHEAD_BYTES: usize = 20;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Label used when rendering a transcript.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.eq_ignore_ascii_case("user") {
            Ok(Role::User)
        } else if normalized.eq_ignore_ascii_case("assistant") {
            Ok(Role::Assistant)
        } else {
            Err(MemoryError::UnknownRole(value.to_string()))
        }
    }
}

/// One conversational exchange unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::at(role, content, Utc::now())
    }

    /// Create a turn with an explicit timestamp.
    pub fn at(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Estimated footprint: role name bytes + content bytes + fixed overhead.
    pub fn estimated_bytes(&self) -> usize {
        self.role.as_str().len() + self.content.len() + TURN_OVERHEAD_BYTES
    }
}

/// Category of a remembered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[serde(alias = "CONVERSATION")]
    Conversation,
    #[serde(alias = "FACT")]
    Fact,
    #[serde(alias = "PREFERENCE")]
    Preference,
    #[serde(alias = "EVENT")]
    Event,
}

/// Bookkeeping attached to every memory document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default, deserialize_with = "lenient::count")]
    pub compression_level: u32,
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_memories: usize,
}

/// A weighted user preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub weight: f64,
}

/// What the agent knows about its user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub age: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub gender: Option<String>,
    #[serde(default)]
    pub preferences: Vec<Preference>,
    #[serde(default)]
    pub traits: Vec<String>,
}

/// A single remembered item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub context: String,
}

/// Short-lived conversational state carried between compactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentContext {
    #[serde(default)]
    pub last_topic: String,
    #[serde(default)]
    pub emotional_state: String,
    #[serde(default)]
    pub interaction_style: String,
}

/// Versioned long-term memory document persisted by the store.
///
/// All five sections are required when parsing; leaves inside them default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub version: String,
    pub metadata: Metadata,
    pub user_profile: UserProfile,
    pub memories: Vec<MemoryItem>,
    pub recent_context: RecentContext,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl MemoryDocument {
    /// Document version written for fresh stores.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// The document returned when nothing has been committed yet.
    pub fn empty() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            metadata: Metadata::default(),
            user_profile: UserProfile::default(),
            memories: Vec::new(),
            recent_context: RecentContext::default(),
        }
    }

    /// Parse a document from JSON text.
    pub fn from_json(raw: &str) -> Result<Self, MemoryError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Canonical compact JSON form; this is what gets persisted.
    pub fn to_json(&self) -> Result<String, MemoryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Human-readable JSON form.
    pub fn to_json_pretty(&self) -> Result<String, MemoryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Size in bytes of the canonical serialized form.
    pub fn serialized_len(&self) -> Result<usize, MemoryError> {
        Ok(self.to_json()?.len())
    }

    /// Check field invariants serde cannot express.
    ///
    /// Memory ids must be non-empty and unique; importance and preference
    /// weights must lie in `[0, 1]`.
    pub fn validate(&self) -> Result<(), MemoryError> {
        let mut seen = HashSet::new();
        for item in &self.memories {
            if item.id.trim().is_empty() {
                return Err(MemoryError::InvalidDocument(
                    "memory id must not be empty".to_string(),
                ));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(MemoryError::InvalidDocument(format!(
                    "duplicate memory id: {}",
                    item.id
                )));
            }
            if !unit_interval(item.importance) {
                return Err(MemoryError::InvalidDocument(format!(
                    "importance of {} out of range: {}",
                    item.id, item.importance
                )));
            }
        }
        for preference in &self.user_profile.preferences {
            if !unit_interval(preference.weight) {
                return Err(MemoryError::InvalidDocument(format!(
                    "weight of preference {} out of range: {}",
                    preference.kind, preference.weight
                )));
            }
        }
        Ok(())
    }
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

/// Deserializers for loosely typed fields of model-written documents.
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    /// A string, number or boolean, kept as text.
    pub(super) fn text<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text)),
            Value::Number(number) => Ok(Some(number.to_string())),
            Value::Bool(flag) => Ok(Some(flag.to_string())),
            other => Err(D::Error::custom(format!(
                "expected a string or number, got {other}"
            ))),
        }
    }

    /// A non-negative number, possibly fractional or quoted, rounded to an integer.
    pub(super) fn count<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64> + Default,
    {
        let value = Value::deserialize(deserializer)?;
        let number = match &value {
            Value::Null => return Ok(T::default()),
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        match number {
            Some(n) if n.is_finite() && n >= 0.0 => T::try_from(n.round() as u64)
                .map_err(|_| D::Error::custom(format!("number out of range: {value}"))),
            _ => Err(D::Error::custom(format!(
                "expected a non-negative number, got {value}"
            ))),
        }
    }
}
