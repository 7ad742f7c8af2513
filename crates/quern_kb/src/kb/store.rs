use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use quern_core::error::AppError;
use quern_core::model::{ModelInfo, ModelLimits, Models};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::embed::Embedder;

use super::model::{Chunk, Document, Snapshot};

/// Schema version written by this build.
pub const CURRENT_VERSION: &str = "1.0.0";

/// Version assumed for snapshots that predate the version tag.
pub const OLDEST_VERSION: &str = "0.1.0";

/// The document/chunk aggregate plus its active model configuration.
///
/// Built for one process and sequential operation: nothing locks, all
/// mutation is in place, and persistence only happens through an explicit
/// [`KnowledgeBase::save`]. A crash mid-pass loses staged in-memory work
/// but never corrupts the snapshot on disk.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    root: PathBuf,
    version: String,
    model: String,
    limits: ModelLimits,
    pub(crate) documents: Vec<Document>,
    pub(crate) chunks: Vec<Chunk>,
}

/// Outcome of a schema migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub was: String,
    pub now: String,
}

impl KnowledgeBase {
    /// Creates an empty knowledge base rooted at an existing directory.
    /// The root is fixed for the life of the aggregate.
    pub fn create(root: impl AsRef<Path>, model: &str) -> Result<Self, AppError> {
        let given = root.as_ref();
        let root = given.canonicalize().map_err(|e| {
            AppError::new("KB_NOT_FOUND", "Knowledge-base root directory not found")
                .with_details(format!("root={}; err={}", given.display(), e))
        })?;
        let models = Models::new();
        let spec = models.find(model)?;
        Ok(Self {
            root,
            version: CURRENT_VERSION.to_string(),
            model: spec.name.clone(),
            limits: ModelLimits::for_spec(spec),
            documents: Vec::new(),
            chunks: Vec::new(),
        })
    }

    /// Loads a snapshot. The root becomes the snapshot file's parent
    /// directory, overriding whatever the snapshot recorded.
    ///
    /// A missing version tag is read as [`OLDEST_VERSION`]. A version
    /// other than [`CURRENT_VERSION`] is refused unless `migrate` is set,
    /// in which case the stale aggregate is returned staged for
    /// [`KnowledgeBase::migrate`].
    pub fn load(path: impl AsRef<Path>, migrate: bool) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("KB_NOT_FOUND", "Snapshot file not found")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let mut snap: Snapshot = serde_json::from_str(&raw).map_err(|e| {
            AppError::new("KB_SNAPSHOT_FAILED", "Failed to decode snapshot")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        if snap.version.is_empty() {
            snap.version = OLDEST_VERSION.to_string();
        }
        if snap.version != CURRENT_VERSION && !migrate {
            return Err(AppError::new(
                "KB_VERSION_MISMATCH",
                "Snapshot was written by a different schema version",
            )
            .with_details(format!(
                "snapshot={}; running={}; rerun with migration enabled",
                snap.version, CURRENT_VERSION
            )));
        }

        if snap.version == CURRENT_VERSION {
            for chunk in &snap.chunks {
                if sha256_hex(chunk.text.as_bytes()) != chunk.text_sha256 {
                    return Err(AppError::new(
                        "KB_SNAPSHOT_FAILED",
                        "Chunk text does not match its recorded hash",
                    )
                    .with_details(format!("rel_path={}", chunk.rel_path)));
                }
            }
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let root = parent.canonicalize().map_err(|e| {
            AppError::new("KB_NOT_FOUND", "Snapshot parent directory not found")
                .with_details(format!("path={}; err={}", parent.display(), e))
        })?;

        let models = Models::new();
        // A legacy snapshot may name a model that is no longer known; the
        // migration pass re-initializes it, so fall back to the default.
        let spec = if snap.version == CURRENT_VERSION {
            models.find(&snap.model)?
        } else {
            models.find(&snap.model).or_else(|_| models.find(""))?
        };
        Ok(Self {
            root,
            version: snap.version,
            model: spec.name.clone(),
            limits: ModelLimits::for_spec(spec),
            documents: snap.documents,
            chunks: snap.chunks,
        })
    }

    /// Serializes the full aggregate and moves it into place, so a crash
    /// mid-write never corrupts an existing snapshot. Callers save only
    /// after a whole pass has succeeded.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        let snap = Snapshot {
            version: self.version.clone(),
            model: self.model.clone(),
            documents: self.documents.clone(),
            chunks: self.chunks.clone(),
            updated_at: Some(now_rfc3339()),
        };
        let json = serde_json::to_string_pretty(&snap).map_err(|e| {
            AppError::new("KB_SNAPSHOT_FAILED", "Failed to encode snapshot")
                .with_details(e.to_string())
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json.as_bytes()).map_err(|e| {
            AppError::new("KB_SNAPSHOT_FAILED", "Failed to write snapshot")
                .with_details(format!("path={}; err={}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            AppError::new("KB_SNAPSHOT_FAILED", "Failed to finalize snapshot write")
                .with_details(format!(
                    "tmp={}; dest={}; err={}",
                    tmp.display(),
                    path.display(),
                    e
                ))
        })?;
        Ok(())
    }

    /// Applies version upgrade steps in sequence, re-initializes the
    /// model, regenerates every embedding (legacy vectors are not
    /// trusted), and re-saves the snapshot, in that order, so the
    /// snapshot's timestamp is never older than the documents it just
    /// re-indexed.
    pub fn migrate(
        &mut self,
        embedder: &dyn Embedder,
        snapshot_path: impl AsRef<Path>,
    ) -> Result<MigrationReport, AppError> {
        let was = self.version.clone();
        if self.version == OLDEST_VERSION {
            self.migrate_0_1_0_to_1_0_0();
        }
        if self.version != CURRENT_VERSION {
            return Err(AppError::new(
                "KB_VERSION_MISMATCH",
                "No migration path to the running schema version",
            )
            .with_details(format!(
                "snapshot={}; running={}",
                self.version, CURRENT_VERSION
            )));
        }

        let models = Models::new();
        let spec = models.find(&self.model).or_else(|_| models.find(""))?;
        self.model = spec.name.clone();
        self.limits = ModelLimits::for_spec(spec);

        self.refresh_embeddings(embedder)?;
        self.save(snapshot_path)?;
        info!(was = %was, now = %self.version, "migrated snapshot schema");
        Ok(MigrationReport {
            was,
            now: self.version.clone(),
        })
    }

    // 0.1.0 recorded absolute document paths and a per-document embedding
    // index. Rewrite paths root-relative and drop the legacy index; the
    // per-chunk vectors are rebuilt by the caller.
    fn migrate_0_1_0_to_1_0_0(&mut self) {
        for doc in self.documents.iter_mut() {
            if doc.rel_path.is_empty() {
                if let Some(abs) = doc.path.take() {
                    let abs = PathBuf::from(abs);
                    doc.rel_path = abs
                        .strip_prefix(&self.root)
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_else(|_| abs.to_string_lossy().into_owned());
                }
            }
            doc.path = None;
            doc.embeddings.clear();
        }
        self.chunks.clear();
        self.version = CURRENT_VERSION.to_string();
    }

    /// Deferred orphan removal: drops every chunk whose document left the
    /// active list and every chunk a sync pass marked stale. Returns the
    /// number removed.
    pub fn gc(&mut self) -> usize {
        let active: BTreeSet<&str> = self
            .documents
            .iter()
            .map(|d| d.rel_path.as_str())
            .collect();
        let before = self.chunks.len();
        self.chunks
            .retain(|c| !c.stale && active.contains(c.rel_path.as_str()));
        let removed = before - self.chunks.len();
        info!(removed, "garbage collected orphaned chunks");
        removed
    }

    /// Switches the active model. Capacity is monotonic: a model with a
    /// smaller token limit is refused and the prior model stays active.
    pub fn upgrade_model(&mut self, model: &str) -> Result<(), AppError> {
        let models = Models::new();
        let next = models.find(model)?;
        let current = models.find(&self.model)?;
        if next.token_limit < current.token_limit {
            return Err(AppError::new(
                "KB_CAPACITY_DOWNGRADE",
                "Model switch would reduce the token limit",
            )
            .with_details(format!(
                "current={} ({} tokens); requested={} ({} tokens)",
                current.name, current.token_limit, next.name, next.token_limit
            )));
        }
        self.model = next.name.clone();
        self.limits = ModelLimits::for_spec(next);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn limits(&self) -> ModelLimits {
        self.limits
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn list_documents(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.rel_path.as_str()).collect()
    }

    /// Every known model, with the active one marked.
    pub fn list_models(&self) -> Vec<ModelInfo> {
        Models::new()
            .list()
            .iter()
            .map(|spec| ModelInfo {
                spec: spec.clone(),
                active: spec.name == self.model,
            })
            .collect()
    }

    pub(crate) fn abs_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
