use serde::{Deserialize, Serialize};

/// A tracked document. Content is never stored here; it is read from the
/// filesystem under the knowledge-base root on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Path relative to the knowledge-base root, unique among active
    /// documents.
    #[serde(default)]
    pub rel_path: String,
    /// Absolute path recorded by 0.1.0 snapshots; migration rewrites it
    /// into `rel_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// 0.1.0 per-document embedding index; migration discards it in favor
    /// of per-chunk vectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeddings: Vec<Vec<f32>>,
}

impl Document {
    pub fn new(rel_path: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            path: None,
            embeddings: Vec::new(),
        }
    }
}

/// A contiguous passage of one document plus its embedding vector.
///
/// Immutable once created: an edit produces a new chunk rather than
/// mutating this one. `stale` is bookkeeping, not content: it marks a
/// chunk a sync pass stopped matching, for the next GC pass to drop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Relative path of the source document. Many chunks may reference
    /// the same document.
    pub rel_path: String,
    pub text: String,
    pub text_sha256: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub stale: bool,
}

/// Serde form of the whole aggregate: one snapshot file per knowledge
/// base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}
