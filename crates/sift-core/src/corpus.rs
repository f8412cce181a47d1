//! The corpus seam: where tracked files come from.
//!
//! The engine never walks directories or watches filesystems itself; the
//! host supplies a [`Corpus`] implementation and feeds change events
//! through the engine's ingestion API. [`MemoryCorpus`] is a ready-made
//! in-memory implementation for hosts with synthetic corpora and for
//! tests.
//!
//! [`TransientContent`] holds unsaved in-editor content keyed by file id.
//! The orchestrator indexes it through the buffered storage overlay so
//! speculative state never reaches the durable backend.

use crate::types::{FileId, FileMeta};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Host-supplied view of the tracked file corpus.
pub trait Corpus: Send + Sync {
    /// Metadata for a file, or `None` if the id is unknown.
    fn meta(&self, id: FileId) -> Option<FileMeta>;

    /// Durable (saved) content of a file. `None` for removed files, which
    /// index as having no content; an error leaves the file outdated and
    /// retried on the next pass.
    fn content(&self, id: FileId) -> anyhow::Result<Option<Vec<u8>>>;

    /// Every currently tracked file id. Only consulted by bootstrap and
    /// full rebuilds, never per query.
    fn all_files(&self) -> Vec<FileId>;
}

/// Simple in-memory corpus.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    files: RwLock<HashMap<FileId, (FileMeta, Vec<u8>)>>,
}

impl MemoryCorpus {
    /// Create an empty corpus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file.
    pub fn insert(&self, id: FileId, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let content = content.into();
        let meta = FileMeta {
            id,
            path: path.into(),
            len: content.len() as u64,
            is_valid: true,
        };
        self.files.write().insert(id, (meta, content));
    }

    /// Remove a file from the corpus.
    pub fn remove(&self, id: FileId) {
        self.files.write().remove(&id);
    }
}

impl Corpus for MemoryCorpus {
    fn meta(&self, id: FileId) -> Option<FileMeta> {
        self.files.read().get(&id).map(|(meta, _)| meta.clone())
    }

    fn content(&self, id: FileId) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.files.read().get(&id).map(|(_, content)| content.clone()))
    }

    fn all_files(&self) -> Vec<FileId> {
        self.files.read().keys().copied().collect()
    }
}

/// Unsaved in-memory content, keyed by file id.
#[derive(Debug, Default)]
pub struct TransientContent {
    docs: DashMap<FileId, Arc<Vec<u8>>>,
}

impl TransientContent {
    /// Create an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a file's unsaved content.
    pub fn set(&self, id: FileId, content: impl Into<Vec<u8>>) {
        self.docs.insert(id, Arc::new(content.into()));
    }

    /// Drop a file's unsaved content. Returns true if any was present.
    pub fn clear(&self, id: FileId) -> bool {
        self.docs.remove(&id).is_some()
    }

    /// Get a file's unsaved content.
    pub fn get(&self, id: FileId) -> Option<Arc<Vec<u8>>> {
        self.docs.get(&id).map(|entry| Arc::clone(&entry))
    }

    /// File ids with unsaved content.
    pub fn file_ids(&self) -> Vec<FileId> {
        self.docs.iter().map(|entry| *entry.key()).collect()
    }

    /// True if no unsaved content is held.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_corpus() {
        let corpus = MemoryCorpus::new();
        corpus.insert(FileId::new(1), "a.txt", "hello");
        corpus.insert(FileId::new(2), "b.txt", "world");

        assert_eq!(corpus.meta(FileId::new(1)).unwrap().path, "a.txt");
        assert_eq!(
            corpus.content(FileId::new(2)).unwrap(),
            Some(b"world".to_vec())
        );
        assert_eq!(corpus.all_files().len(), 2);

        corpus.remove(FileId::new(1));
        assert!(corpus.meta(FileId::new(1)).is_none());
        assert_eq!(corpus.content(FileId::new(1)).unwrap(), None);
    }

    #[test]
    fn test_transient_overlay() {
        let transient = TransientContent::new();
        assert!(transient.is_empty());

        transient.set(FileId::new(1), "draft");
        assert_eq!(&*transient.get(FileId::new(1)).unwrap(), b"draft");

        assert!(transient.clear(FileId::new(1)));
        assert!(!transient.clear(FileId::new(1)));
        assert!(transient.get(FileId::new(1)).is_none());
    }
}
