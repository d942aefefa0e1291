//! Hierarchical context nodes and the changes applied to them.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use hivemind_storage::NODE_KEY_PREFIX;

/// A JSON object.
pub type JsonMap = Map<String, Value>;

/// Node type used when none is given.
pub const DEFAULT_NODE_TYPE: &str = "generic";

fn default_node_type() -> String {
    DEFAULT_NODE_TYPE.to_string()
}

const fn first_version() -> u64 {
    1
}

/// Generate a fresh node id: `ctx_` followed by 32 hex digits.
#[must_use]
pub fn generate_node_id() -> String {
    format!("{NODE_KEY_PREFIX}{}", Uuid::new_v4().simple())
}

/// A versioned, taggable record in a context hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    /// Unique id, assigned at creation.
    #[serde(alias = "node_id")]
    pub id: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: JsonMap,
    /// Free-form kind such as `task` or `conversation`.
    #[serde(default = "default_node_type")]
    pub node_type: String,
    /// Declared parent. May point at a node that no longer exists.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Labels, kept sorted and unique.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Bookkeeping separate from `data`.
    #[serde(default)]
    pub metadata: JsonMap,
    /// Creation time. Never changes.
    pub created_at: DateTime<Utc>,
    /// Time of the last successful mutation.
    pub updated_at: DateTime<Utc>,
    /// Starts at 1 and grows by one per mutation.
    #[serde(default = "first_version")]
    pub version: u64,
}

impl ContextNode {
    /// Build version 1 of a node from creation parameters.
    #[must_use]
    pub fn create(id: impl Into<String>, new: NewContext, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            data: new.data,
            node_type: new.node_type,
            parent_id: new.parent_id,
            tags: new.tags,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            version: first_version(),
        }
    }

    /// Whether the node carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Apply `update` as one mutation.
    ///
    /// `data` and `metadata` are shallow-merged (incoming keys win), tags are
    /// unioned and then `remove_tags` are dropped. `updated_at` never moves
    /// backwards, and `version` grows by exactly one.
    pub fn apply(&mut self, update: &ContextUpdate, now: DateTime<Utc>) {
        if let Some(data) = &update.data {
            self.data
                .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.tags.extend(update.tags.iter().cloned());
        for tag in &update.remove_tags {
            self.tags.remove(tag);
        }
        if let Some(metadata) = &update.metadata {
            self.metadata
                .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.updated_at = now.max(self.updated_at);
        self.version = self.version.saturating_add(1);
    }
}

/// Parameters for [`ContextManager::create_context`](crate::ContextManager::create_context).
#[derive(Debug, Clone, PartialEq)]
pub struct NewContext {
    /// Payload.
    pub data: JsonMap,
    /// Node type, `generic` by default.
    pub node_type: String,
    /// Parent to link under.
    pub parent_id: Option<String>,
    /// Initial tags.
    pub tags: BTreeSet<String>,
    /// Initial metadata.
    pub metadata: JsonMap,
    /// Expiry, on backends that support it.
    pub ttl: Option<Duration>,
}

impl Default for NewContext {
    fn default() -> Self {
        Self::new(JsonMap::new())
    }
}

impl NewContext {
    /// A generic node holding `data`.
    #[must_use]
    pub fn new(data: JsonMap) -> Self {
        Self {
            data,
            node_type: default_node_type(),
            parent_id: None,
            tags: BTreeSet::new(),
            metadata: JsonMap::new(),
            ttl: None,
        }
    }

    /// Set the node type.
    #[must_use]
    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    /// Link the node under `parent_id`.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Add tags.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Expire the node after `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A change to an existing node. Empty fields leave the node untouched,
/// though applying even an empty update bumps the version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    /// Keys to merge into `data`.
    pub data: Option<JsonMap>,
    /// Tags to add.
    pub tags: BTreeSet<String>,
    /// Tags to remove, applied after `tags`.
    pub remove_tags: BTreeSet<String>,
    /// Keys to merge into `metadata`.
    pub metadata: Option<JsonMap>,
    /// New expiry. `None` keeps whatever the key has now.
    pub ttl: Option<Duration>,
}

impl ContextUpdate {
    /// An update that changes nothing but the version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `data` into the payload.
    #[must_use]
    pub fn with_data(mut self, data: JsonMap) -> Self {
        self.data = Some(data);
        self
    }

    /// Add one tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Remove one tag.
    #[must_use]
    pub fn without_tag(mut self, tag: impl Into<String>) -> Self {
        self.remove_tags.insert(tag.into());
        self
    }

    /// Merge `metadata` into the node's metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replace the node's expiry.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
