use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Schema version written into every index file.
pub const INDEX_VERSION: u32 = 1;

/// Namespace used when the caller does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Opaque per-record attributes, passed through untouched on search.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The atomic unit of the index
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Assigned by the index on insert, never reused
    pub id: u64,

    /// The source chunk, immutable once stored
    pub text: String,

    /// The embedding (the "meaning")
    pub vector: Vec<f32>,

    /// Logical collection this record belongs to
    pub namespace: String,

    #[serde(default)]
    pub metadata: Metadata,
}

/// On-disk form of the whole index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexFile {
    pub version: u32,
    pub next_id: u64,
    pub items: Vec<IndexRecord>,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            next_id: 0,
            items: Vec::new(),
        }
    }
}

/// A record waiting to be inserted. The index assigns its id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub text: String,
    pub vector: Vec<f32>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewRecord {
    pub fn new(text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            vector,
            namespace: DEFAULT_NAMESPACE.to_string(),
            metadata: Metadata::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One ranked search result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub text: String,
    pub score: f32,
    pub namespace: String,
    pub metadata: Metadata,
}

pub(crate) fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
