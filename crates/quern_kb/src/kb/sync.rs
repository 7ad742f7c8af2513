use std::fs;
use std::path::Path;
use std::time::SystemTime;

use quern_core::error::AppError;
use quern_core::model::EMBEDDING_MODEL;
use tracing::debug;

use crate::embed::{embed_all, Embedder};

use super::chunking::split_passages;
use super::model::{Chunk, Document};
use super::store::{sha256_hex, KnowledgeBase};

impl KnowledgeBase {
    /// Reconciles one document against its stored chunks.
    ///
    /// Exact text equality decides reuse: a passage matching a stored
    /// chunk keeps that chunk and its embedding untouched, every other
    /// passage is embedded fresh in one batched pass, and stored chunks
    /// left unmatched are marked stale for the next GC pass rather than
    /// deleted inline. Returns true iff at least one new chunk was
    /// created, so an unchanged file reports false on a repeat call.
    pub fn update_document(
        &mut self,
        embedder: &dyn Embedder,
        rel_path: &str,
    ) -> Result<bool, AppError> {
        let abs = self.abs_path(rel_path);
        let text = fs::read_to_string(&abs).map_err(|e| {
            AppError::new("KB_NOT_FOUND", "Document file could not be read")
                .with_details(format!("path={}; err={}", abs.display(), e))
        })?;
        let limits = self.limits();
        let passages = split_passages(&text, limits.max_embed_item_len);

        // Indices of this document's stored chunks still open for
        // matching; a match is consumed so duplicates pair one-to-one.
        let mut pool: Vec<usize> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.stale && c.rel_path == rel_path)
            .map(|(i, _)| i)
            .collect();
        debug!(
            rel_path,
            stored = pool.len(),
            current = passages.len(),
            "syncing document"
        );

        let mut new_texts: Vec<String> = Vec::new();
        for passage in passages {
            match pool.iter().position(|&i| self.chunks[i].text == passage) {
                Some(at) => {
                    pool.swap_remove(at);
                }
                None => new_texts.push(passage),
            }
        }
        for &i in &pool {
            self.chunks[i].stale = true;
        }

        if new_texts.is_empty() {
            return Ok(false);
        }
        let embeddings = embed_all(embedder, EMBEDDING_MODEL, &new_texts, &limits)?;
        for (text, embedding) in new_texts.into_iter().zip(embeddings) {
            self.chunks.push(Chunk {
                rel_path: rel_path.to_string(),
                text_sha256: sha256_hex(text.as_bytes()),
                text,
                embedding,
                stale: false,
            });
        }
        Ok(true)
    }

    /// Starts tracking a document and synchronizes it. The insertion is
    /// idempotent; re-adding a changed document refreshes its chunks.
    pub fn add_document(
        &mut self,
        embedder: &dyn Embedder,
        path: impl AsRef<Path>,
    ) -> Result<bool, AppError> {
        let rel_path = self.rel_path_for(path.as_ref());
        let abs = self.abs_path(&rel_path);
        if !abs.exists() {
            return Err(AppError::new("KB_NOT_FOUND", "Document not found")
                .with_details(format!("path={}", abs.display())));
        }
        if !self.documents.iter().any(|d| d.rel_path == rel_path) {
            self.documents.push(Document::new(rel_path.clone()));
        }
        self.update_document(embedder, &rel_path)
    }

    /// Stops tracking a document; its chunks stay behind for GC.
    ///
    /// Callers supply either form of the path, so the stored relative
    /// path is matched first and the resolved absolute path second; at
    /// most the first match is removed.
    pub fn forget_document(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        };
        let pos = self.documents.iter().position(|d| {
            Path::new(&d.rel_path) == path || self.abs_path(&d.rel_path) == abs
        });
        if let Some(i) = pos {
            debug!(rel_path = %self.documents[i].rel_path, "forgetting document");
            self.documents.remove(i);
        }
    }

    /// Re-synchronizes every tracked document whose file changed after
    /// `last_update` (callers pass the snapshot file's mtime), forgets
    /// documents whose files are gone, then runs one GC pass. Returns
    /// whether anything changed so the caller can decide whether a save
    /// is warranted.
    pub fn refresh(
        &mut self,
        embedder: &dyn Embedder,
        last_update: SystemTime,
    ) -> Result<bool, AppError> {
        let mut changed = false;
        let rel_paths: Vec<String> = self.documents.iter().map(|d| d.rel_path.clone()).collect();
        for rel_path in rel_paths {
            let abs = self.abs_path(&rel_path);
            let meta = match fs::metadata(&abs) {
                Ok(m) => m,
                Err(_) => {
                    self.forget_document(&rel_path);
                    changed = true;
                    continue;
                }
            };
            let modified = meta.modified().map_err(|e| {
                AppError::new("KB_NOT_FOUND", "Document modification time unavailable")
                    .with_details(format!("path={}; err={}", abs.display(), e))
            })?;
            if modified > last_update {
                changed |= self.update_document(embedder, &rel_path)?;
            }
        }
        changed |= self.gc() > 0;
        Ok(changed)
    }

    /// Drops every chunk and re-synchronizes all documents from scratch,
    /// forgetting any whose files vanished. Migration uses this because
    /// stored vectors from an older schema cannot be trusted.
    pub fn refresh_embeddings(&mut self, embedder: &dyn Embedder) -> Result<(), AppError> {
        self.chunks.clear();
        let rel_paths: Vec<String> = self.documents.iter().map(|d| d.rel_path.clone()).collect();
        for rel_path in rel_paths {
            if !self.abs_path(&rel_path).exists() {
                self.forget_document(&rel_path);
                continue;
            }
            self.update_document(embedder, &rel_path)?;
        }
        self.gc();
        Ok(())
    }

    // Relative inputs are taken as root-relative; absolute inputs are
    // re-expressed relative to the root when they live under it.
    fn rel_path_for(&self, path: &Path) -> String {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        };
        let abs = abs.canonicalize().unwrap_or(abs);
        abs.strip_prefix(self.root())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| abs.to_string_lossy().into_owned())
    }
}
