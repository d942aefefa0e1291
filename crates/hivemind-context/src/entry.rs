//! Flat, agent-scoped context entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Format version stamped into every entry's metadata.
pub const ENTRY_FORMAT_VERSION: &str = "1.0";

/// Content-derived id for an entry: lowercase hex SHA-256 of
/// `"{agent_id}:{timestamp}"`.
#[must_use]
pub fn entry_id(agent_id: &str, timestamp: &str) -> String {
    hex::encode(Sha256::digest(format!("{agent_id}:{timestamp}").as_bytes()))
}

/// Who wrote an entry, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Writing agent.
    pub agent_id: String,
    /// RFC 3339 write time with nanosecond precision.
    pub timestamp: String,
    /// The entry's own id.
    pub context_id: String,
    /// Entry format version, [`ENTRY_FORMAT_VERSION`].
    pub version: String,
}

/// A record in the flat, namespaced store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Opaque payload.
    pub data: Value,
    /// Provenance.
    pub metadata: EntryMetadata,
}

impl ContextEntry {
    /// Build an entry written by `agent_id` at `timestamp`, deriving its id.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, timestamp: impl Into<String>, data: Value) -> Self {
        let agent_id = agent_id.into();
        let timestamp = timestamp.into();
        let context_id = entry_id(&agent_id, &timestamp);
        Self {
            data,
            metadata: EntryMetadata {
                agent_id,
                timestamp,
                context_id,
                version: ENTRY_FORMAT_VERSION.to_string(),
            },
        }
    }

    /// The entry's id.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.metadata.context_id
    }

    /// The writing agent.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.metadata.agent_id
    }
}
