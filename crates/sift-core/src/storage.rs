//! Key → value-container storage with a togglable in-memory overlay.
//!
//! The durable layer ([`MapBackend`]) is a single-file key→container store
//! using the shared envelope format. [`BufferedStorage`] wraps it with an
//! in-memory overlay of change-tracking containers:
//!
//! - buffering **on**: writes land only in the overlay, each container
//!   lazily seeded by one backend read for its key. The durable store is
//!   never touched, which lets the engine index unsaved in-editor content
//!   without corrupting the backend — and discard all of it in one
//!   [`BufferedStorage::clear_memory`] call.
//! - buffering **off**: writes go straight to the backend, and any overlay
//!   entry for the written key is dropped so stale merged data cannot mask
//!   future backend reads.
//!
//! `read` prefers the overlay when an entry exists.

use crate::error::Result;
use crate::persist;
use crate::types::{FileId, KeyBytes, ValueBytes};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const STORAGE_MAGIC: &[u8; 4] = b"SMAP";

/// The set of (file id → value) associations contributed to one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueContainer {
    entries: HashMap<FileId, ValueBytes>,
}

impl ValueContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one file's value.
    pub fn add(&mut self, file: FileId, value: ValueBytes) {
        self.entries.insert(file, value);
    }

    /// Remove one file's association. Returns true if it was present.
    pub fn remove(&mut self, file: FileId) -> bool {
        self.entries.remove(&file).is_some()
    }

    /// Get one file's value.
    pub fn get(&self, file: FileId) -> Option<&ValueBytes> {
        self.entries.get(&file)
    }

    /// True if a file contributed to this key.
    pub fn contains(&self, file: FileId) -> bool {
        self.entries.contains_key(&file)
    }

    /// All contributing file ids.
    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.entries.keys().copied()
    }

    /// Iterate (file, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &ValueBytes)> {
        self.entries.iter().map(|(id, v)| (*id, v))
    }

    /// Number of associations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no file contributes to this key.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Durable single-file key → container store.
pub struct MapBackend {
    path: PathBuf,
    map: RwLock<HashMap<KeyBytes, ValueContainer>>,
    dirty: AtomicBool,
}

impl MapBackend {
    /// Open (or create) the backend at `path`.
    ///
    /// A corrupted file surfaces as `StorageCorrupted` so the orchestrator
    /// can schedule a rebuild instead of silently starting empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = persist::load::<HashMap<KeyBytes, ValueContainer>>(&path, STORAGE_MAGIC)?
            .unwrap_or_default();
        debug!(path = %path.display(), keys = map.len(), "storage backend opened");
        Ok(MapBackend {
            path,
            map: RwLock::new(map),
            dirty: AtomicBool::new(false),
        })
    }

    /// Read one key's container.
    pub fn read(&self, key: &[u8]) -> Option<ValueContainer> {
        self.map.read().get(key).cloned()
    }

    /// Replace one key's container; an empty container deletes the key.
    pub fn put(&self, key: KeyBytes, container: ValueContainer) {
        let mut map = self.map.write();
        if container.is_empty() {
            map.remove(&key);
        } else {
            map.insert(key, container);
        }
        self.dirty.store(true, Ordering::Release);
    }

    /// Visit every stored key; stops early when the visitor returns false.
    pub fn process_keys(&self, mut visitor: impl FnMut(&KeyBytes) -> bool) -> bool {
        let map = self.map.read();
        for key in map.keys() {
            if !visitor(key) {
                return false;
            }
        }
        true
    }

    /// Number of stored keys.
    pub fn key_count(&self) -> usize {
        self.map.read().len()
    }

    /// Persist pending writes, if any.
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let map = self.map.read();
        persist::save(&self.path, STORAGE_MAGIC, &*map)
    }

    /// Drop all data, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.map.write().clear();
        self.dirty.store(false, Ordering::Release);
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Buffered overlay over a [`MapBackend`].
pub struct BufferedStorage {
    backend: MapBackend,
    overlay: DashMap<KeyBytes, ValueContainer>,
    buffering: AtomicBool,
}

impl BufferedStorage {
    /// Open buffered storage over the backend file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(BufferedStorage {
            backend: MapBackend::open(path)?,
            overlay: DashMap::new(),
            buffering: AtomicBool::new(false),
        })
    }

    /// Toggle buffering mode.
    pub fn set_buffering_enabled(&self, enabled: bool) {
        self.buffering.store(enabled, Ordering::Release);
    }

    /// Current buffering mode.
    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    /// Associate `value` with (key, file).
    pub fn add_value(&self, key: &[u8], file: FileId, value: ValueBytes) {
        if self.is_buffering() {
            self.overlay_entry(key).add(file, value);
        } else {
            self.overlay.remove(key);
            let mut container = self.backend.read(key).unwrap_or_default();
            container.add(file, value);
            self.backend.put(key.to_vec(), container);
        }
    }

    /// Remove every association of `file` under `key`.
    pub fn remove_all(&self, key: &[u8], file: FileId) {
        if self.is_buffering() {
            self.overlay_entry(key).remove(file);
        } else {
            self.overlay.remove(key);
            let mut container = self.backend.read(key).unwrap_or_default();
            container.remove(file);
            self.backend.put(key.to_vec(), container);
        }
    }

    fn overlay_entry(&self, key: &[u8]) -> dashmap::mapref::one::RefMut<'_, KeyBytes, ValueContainer> {
        // The diff container is seeded by reading the backend once per key.
        self.overlay
            .entry(key.to_vec())
            .or_insert_with(|| self.backend.read(key).unwrap_or_default())
    }

    /// Read one key, preferring the in-memory diff if present.
    pub fn read(&self, key: &[u8]) -> Option<ValueContainer> {
        if let Some(entry) = self.overlay.get(key) {
            if entry.is_empty() {
                return None;
            }
            return Some(entry.clone());
        }
        self.backend.read(key)
    }

    /// Visit every live key (backend and overlay, each once); stops early
    /// when the visitor returns false.
    pub fn process_keys(&self, mut visitor: impl FnMut(&KeyBytes) -> bool) -> bool {
        let mut seen: std::collections::HashSet<KeyBytes> = std::collections::HashSet::new();
        let done = self.backend.process_keys(|key| {
            seen.insert(key.clone());
            visitor(key)
        });
        if !done {
            return false;
        }
        for entry in self.overlay.iter() {
            if entry.is_empty() || seen.contains(entry.key()) {
                continue;
            }
            if !visitor(entry.key()) {
                return false;
            }
        }
        true
    }

    /// Discard every speculative (overlay) container.
    pub fn clear_memory(&self) {
        self.overlay.clear();
    }

    /// Persist the durable layer. Overlay data is speculative by contract
    /// and never flushed.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Drop all data, overlay and backend.
    pub fn clear(&self) -> Result<()> {
        self.overlay.clear();
        self.backend.clear()
    }

    /// Flush and release the storage.
    pub fn close(&self) -> Result<()> {
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> BufferedStorage {
        BufferedStorage::open(dir.path().join("storage.bin")).unwrap()
    }

    #[test]
    fn test_direct_writes_persist() {
        let dir = TempDir::new().unwrap();
        {
            let s = storage(&dir);
            s.add_value(b"alpha", FileId::new(1), vec![]);
            s.add_value(b"alpha", FileId::new(2), vec![9]);
            s.flush().unwrap();
        }

        let s = storage(&dir);
        let container = s.read(b"alpha").unwrap();
        assert_eq!(container.len(), 2);
        assert_eq!(container.get(FileId::new(2)), Some(&vec![9]));
    }

    #[test]
    fn test_remove_all_drops_empty_key() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        s.add_value(b"alpha", FileId::new(1), vec![]);
        s.remove_all(b"alpha", FileId::new(1));
        assert!(s.read(b"alpha").is_none());
    }

    #[test]
    fn test_buffered_writes_stay_in_memory() {
        let dir = TempDir::new().unwrap();
        {
            let s = storage(&dir);
            s.add_value(b"alpha", FileId::new(1), vec![1]);
            s.flush().unwrap();

            s.set_buffering_enabled(true);
            s.add_value(b"alpha", FileId::new(2), vec![2]);
            s.add_value(b"beta", FileId::new(2), vec![3]);

            // Reads see the overlay (diff over the backend)...
            assert_eq!(s.read(b"alpha").unwrap().len(), 2);
            assert_eq!(s.read(b"beta").unwrap().len(), 1);
            s.flush().unwrap();
        }

        // ...but the durable layer never saw the buffered writes.
        let s = storage(&dir);
        assert_eq!(s.read(b"alpha").unwrap().len(), 1);
        assert!(s.read(b"beta").is_none());
    }

    #[test]
    fn test_clear_memory_discards_speculative_state() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        s.add_value(b"alpha", FileId::new(1), vec![1]);

        s.set_buffering_enabled(true);
        s.remove_all(b"alpha", FileId::new(1));
        s.add_value(b"beta", FileId::new(9), vec![]);
        assert!(s.read(b"alpha").is_none());

        s.clear_memory();
        assert_eq!(s.read(b"alpha").unwrap().len(), 1);
        assert!(s.read(b"beta").is_none());
    }

    #[test]
    fn test_unbuffered_write_invalidates_overlay() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);

        s.set_buffering_enabled(true);
        s.add_value(b"alpha", FileId::new(1), vec![1]);

        s.set_buffering_enabled(false);
        s.add_value(b"alpha", FileId::new(2), vec![2]);

        // The overlay entry was dropped; the read reflects the backend,
        // which never saw the buffered write for file 1.
        let container = s.read(b"alpha").unwrap();
        assert!(container.contains(FileId::new(2)));
        assert!(!container.contains(FileId::new(1)));
    }

    #[test]
    fn test_process_keys_union() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        s.add_value(b"alpha", FileId::new(1), vec![]);
        s.set_buffering_enabled(true);
        s.add_value(b"beta", FileId::new(1), vec![]);

        let mut keys = Vec::new();
        s.process_keys(|k| {
            keys.push(k.clone());
            true
        });
        keys.sort();
        assert_eq!(keys, vec![b"alpha".to_vec(), b"beta".to_vec()]);

        // Short-circuit.
        let mut count = 0;
        let done = s.process_keys(|_| {
            count += 1;
            false
        });
        assert!(!done);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_corrupted_backend_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.bin");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(BufferedStorage::open(&path).is_err());
    }
}
