//! Per-file, per-index indexing stamps.
//!
//! A stamp records which version of an index a file was last indexed
//! against. Three states are derived from it:
//!
//! - *current*: the stamp equals the index's live creation stamp (its
//!   version record's modification count)
//! - *outdated*: the [`OUTDATED_STAMP`] sentinel
//! - *never indexed*: no stamp recorded
//!
//! ## Persistence
//!
//! Each file's stamps are encoded into one compact attribute blob: a
//! dominating stamp value, the index ordinals carrying it, and an
//! exception list of (ordinal, stamp) pairs. Outdated sentinels always
//! land in the exception list. Blobs live in a single attribute file
//! loaded lazily on first access; writes are buffered per file and pushed
//! through a bounded dirty queue — filling the queue evicts the oldest
//! entries and forces a batched write.
//!
//! ## Concurrency
//!
//! Reads and writes are guarded by a 16-way lock striped by file id,
//! bounding contention without a single global lock. Virtual file ids are
//! served from the striped cache only and never persisted.

use crate::error::Result;
use crate::persist;
use crate::types::FileId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sentinel stamp meaning "indexed once, now known stale".
pub const OUTDATED_STAMP: u64 = u64::MAX;

const STRIPES: usize = 16;
const STAMP_MAGIC: &[u8; 4] = b"SSTP";

/// Compact on-disk encoding of one file's stamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StampBlob {
    dominating: u64,
    at_dominating: Vec<u16>,
    exceptions: Vec<(u16, u64)>,
}

/// Decoded in-memory stamps of one file, keyed by index ordinal.
#[derive(Debug, Clone, Default)]
struct FileStamps {
    stamps: HashMap<u16, u64>,
}

impl FileStamps {
    fn to_blob(&self) -> Option<StampBlob> {
        if self.stamps.is_empty() {
            return None;
        }

        // Pick the most frequent non-sentinel stamp as dominating; indices
        // rewritten together share a creation stamp, so most files encode
        // as one value plus a short exception list.
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for &stamp in self.stamps.values() {
            if stamp != OUTDATED_STAMP {
                *counts.entry(stamp).or_insert(0) += 1;
            }
        }
        let dominating = counts
            .into_iter()
            .max_by_key(|&(stamp, count)| (count, stamp))
            .map(|(stamp, _)| stamp)
            .unwrap_or(0);

        let mut at_dominating = Vec::new();
        let mut exceptions = Vec::new();
        for (&ordinal, &stamp) in &self.stamps {
            if stamp == dominating {
                at_dominating.push(ordinal);
            } else {
                exceptions.push((ordinal, stamp));
            }
        }
        at_dominating.sort_unstable();
        exceptions.sort_unstable();

        Some(StampBlob {
            dominating,
            at_dominating,
            exceptions,
        })
    }

    fn from_blob(blob: &StampBlob) -> Self {
        let mut stamps = HashMap::new();
        for &ordinal in &blob.at_dominating {
            stamps.insert(ordinal, blob.dominating);
        }
        for &(ordinal, stamp) in &blob.exceptions {
            stamps.insert(ordinal, stamp);
        }
        FileStamps { stamps }
    }
}

/// Striped, write-buffered store of per-file indexing stamps.
pub struct StampStore {
    path: PathBuf,
    stripes: Vec<Mutex<HashMap<FileId, FileStamps>>>,
    disk: Mutex<Option<HashMap<u32, StampBlob>>>,
    dirty: Mutex<DirtyQueue>,
    dirty_capacity: usize,
}

#[derive(Debug, Default)]
struct DirtyQueue {
    order: VecDeque<FileId>,
    members: HashSet<FileId>,
}

impl StampStore {
    /// Open a store backed by the given attribute file.
    pub fn open(path: impl AsRef<Path>, dirty_capacity: usize) -> Self {
        StampStore {
            path: path.as_ref().to_path_buf(),
            stripes: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
            disk: Mutex::new(None),
            dirty: Mutex::new(DirtyQueue::default()),
            dirty_capacity: dirty_capacity.max(1),
        }
    }

    fn stripe(&self, file: FileId) -> &Mutex<HashMap<FileId, FileStamps>> {
        &self.stripes[file.as_u32() as usize % STRIPES]
    }

    /// Run `f` over the lazily-loaded persistent blob map.
    fn with_disk<R>(&self, f: impl FnOnce(&mut HashMap<u32, StampBlob>) -> R) -> Result<R> {
        let mut guard = self.disk.lock();
        if guard.is_none() {
            let loaded = persist::load::<HashMap<u32, StampBlob>>(&self.path, STAMP_MAGIC)?
                .unwrap_or_default();
            debug!(files = loaded.len(), "stamp attributes loaded");
            *guard = Some(loaded);
        }
        Ok(f(guard.as_mut().expect("loaded above")))
    }

    /// Fetch (decoding and caching on miss) a file's stamps, then apply `f`.
    fn with_stamps<R>(&self, file: FileId, f: impl FnOnce(&mut FileStamps) -> R) -> Result<R> {
        let mut cache = self.stripe(file).lock();
        if !cache.contains_key(&file) {
            let loaded = if file.is_virtual() {
                FileStamps::default()
            } else {
                self.with_disk(|disk| {
                    disk.get(&file.as_u32())
                        .map(FileStamps::from_blob)
                        .unwrap_or_default()
                })?
            };
            cache.insert(file, loaded);
        }
        Ok(f(cache.get_mut(&file).expect("inserted above")))
    }

    /// Check whether a file is current for an index's live creation stamp.
    pub fn is_current(&self, file: FileId, ordinal: u16, creation_stamp: u64) -> Result<bool> {
        self.with_stamps(file, |stamps| {
            stamps.stamps.get(&ordinal) == Some(&creation_stamp)
        })
    }

    /// Record that a file was indexed at the given creation stamp.
    pub fn set_current(&self, file: FileId, ordinal: u16, creation_stamp: u64) -> Result<()> {
        self.with_stamps(file, |stamps| {
            stamps.stamps.insert(ordinal, creation_stamp);
        })?;
        self.mark_dirty(file)
    }

    /// Mark a file outdated for one index.
    pub fn set_outdated(&self, file: FileId, ordinal: u16) -> Result<()> {
        self.with_stamps(file, |stamps| {
            stamps.stamps.insert(ordinal, OUTDATED_STAMP);
        })?;
        self.mark_dirty(file)
    }

    /// Drop a file's stamp for one index entirely (back to "never indexed").
    pub fn clear(&self, file: FileId, ordinal: u16) -> Result<()> {
        self.with_stamps(file, |stamps| {
            stamps.stamps.remove(&ordinal);
        })?;
        self.mark_dirty(file)
    }

    /// All index ordinals with a non-default stamp for this file.
    pub fn nontrivial_states(&self, file: FileId) -> Result<Vec<u16>> {
        self.with_stamps(file, |stamps| {
            let mut ordinals: Vec<u16> = stamps.stamps.keys().copied().collect();
            ordinals.sort_unstable();
            ordinals
        })
    }

    fn mark_dirty(&self, file: FileId) -> Result<()> {
        if file.is_virtual() {
            return Ok(());
        }

        let evicted = {
            let mut dirty = self.dirty.lock();
            if dirty.members.insert(file) {
                dirty.order.push_back(file);
            }
            if dirty.order.len() > self.dirty_capacity {
                // Evict the oldest half in one batch so a full queue costs
                // one write, not one write per subsequent update.
                let take = (dirty.order.len() / 2).max(1);
                let mut batch = Vec::with_capacity(take);
                for _ in 0..take {
                    if let Some(id) = dirty.order.pop_front() {
                        dirty.members.remove(&id);
                        batch.push(id);
                    }
                }
                batch
            } else {
                Vec::new()
            }
        };

        if !evicted.is_empty() {
            self.write_batch(&evicted)?;
        }
        Ok(())
    }

    fn write_batch(&self, files: &[FileId]) -> Result<()> {
        let mut encoded = Vec::with_capacity(files.len());
        for &file in files {
            let blob = {
                let cache = self.stripe(file).lock();
                cache.get(&file).and_then(FileStamps::to_blob)
            };
            encoded.push((file.as_u32(), blob));
        }

        self.with_disk(|disk| {
            for (id, blob) in encoded {
                match blob {
                    Some(blob) => {
                        disk.insert(id, blob);
                    }
                    None => {
                        disk.remove(&id);
                    }
                }
            }
        })?;
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let guard = self.disk.lock();
        if let Some(disk) = guard.as_ref() {
            persist::save(&self.path, STAMP_MAGIC, disk)?;
        }
        Ok(())
    }

    /// Flush one file's buffered stamp write.
    pub fn flush(&self, file: FileId) -> Result<()> {
        if file.is_virtual() {
            return Ok(());
        }
        {
            let mut dirty = self.dirty.lock();
            if !dirty.members.remove(&file) {
                return Ok(());
            }
            dirty.order.retain(|&id| id != file);
        }
        self.write_batch(&[file])
    }

    /// Flush every buffered stamp write.
    pub fn flush_all(&self) -> Result<()> {
        let batch: Vec<FileId> = {
            let mut dirty = self.dirty.lock();
            dirty.members.clear();
            dirty.order.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(&batch)
    }

    /// Drop every stamp belonging to one index, across all files.
    ///
    /// Used by a full rebuild: afterwards every file is "never indexed"
    /// for that index.
    pub fn wipe_index(&self, ordinal: u16) -> Result<()> {
        for stripe in &self.stripes {
            let mut cache = stripe.lock();
            for stamps in cache.values_mut() {
                stamps.stamps.remove(&ordinal);
            }
        }
        self.with_disk(|disk| {
            disk.retain(|_, blob| {
                blob.at_dominating.retain(|&o| o != ordinal);
                blob.exceptions.retain(|&(o, _)| o != ordinal);
                !blob.at_dominating.is_empty() || !blob.exceptions.is_empty()
            });
        })?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StampStore {
        StampStore::open(dir.path().join("stamps.bin"), 64)
    }

    #[test]
    fn test_stamp_states() {
        let dir = TempDir::new().unwrap();
        let stamps = store(&dir);
        let file = FileId::new(1);

        // Never indexed.
        assert!(!stamps.is_current(file, 0, 100).unwrap());

        stamps.set_current(file, 0, 100).unwrap();
        assert!(stamps.is_current(file, 0, 100).unwrap());
        // A version rewrite moves the creation stamp; the file is no
        // longer current without its stamp changing.
        assert!(!stamps.is_current(file, 0, 101).unwrap());

        stamps.set_outdated(file, 0).unwrap();
        assert!(!stamps.is_current(file, 0, 100).unwrap());
        assert_eq!(stamps.nontrivial_states(file).unwrap(), vec![0]);

        stamps.clear(file, 0).unwrap();
        assert!(stamps.nontrivial_states(file).unwrap().is_empty());
    }

    #[test]
    fn test_blob_roundtrip_dominating_and_exceptions() {
        let mut stamps = FileStamps::default();
        stamps.stamps.insert(0, 500);
        stamps.stamps.insert(1, 500);
        stamps.stamps.insert(2, OUTDATED_STAMP);
        stamps.stamps.insert(3, 700);

        let blob = stamps.to_blob().unwrap();
        assert_eq!(blob.dominating, 500);
        assert_eq!(blob.at_dominating, vec![0, 1]);
        assert!(blob.exceptions.contains(&(2, OUTDATED_STAMP)));
        assert!(blob.exceptions.contains(&(3, 700)));

        let decoded = FileStamps::from_blob(&blob);
        assert_eq!(decoded.stamps, stamps.stamps);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let stamps = store(&dir);
            stamps.set_current(FileId::new(1), 0, 42).unwrap();
            stamps.set_outdated(FileId::new(2), 0).unwrap();
            stamps.flush_all().unwrap();
        }

        let stamps = store(&dir);
        assert!(stamps.is_current(FileId::new(1), 0, 42).unwrap());
        assert_eq!(stamps.nontrivial_states(FileId::new(2)).unwrap(), vec![0]);
    }

    #[test]
    fn test_bounded_queue_forces_write() {
        let dir = TempDir::new().unwrap();
        let stamps = StampStore::open(dir.path().join("stamps.bin"), 4);
        for i in 1..=20 {
            stamps.set_current(FileId::new(i), 0, 7).unwrap();
        }
        // Evictions must have persisted some entries without an explicit
        // flush.
        assert!(dir.path().join("stamps.bin").exists());

        let reopened = StampStore::open(dir.path().join("stamps.bin"), 4);
        assert!(reopened.is_current(FileId::new(1), 0, 7).unwrap());
    }

    #[test]
    fn test_virtual_files_never_persisted() {
        let dir = TempDir::new().unwrap();
        let stamps = store(&dir);
        let virt = FileId::from_raw(-3);

        stamps.set_current(virt, 0, 9).unwrap();
        assert!(stamps.is_current(virt, 0, 9).unwrap());
        stamps.flush_all().unwrap();

        let reopened = store(&dir);
        assert!(!reopened.is_current(virt, 0, 9).unwrap());
    }

    #[test]
    fn test_wipe_index() {
        let dir = TempDir::new().unwrap();
        let stamps = store(&dir);
        stamps.set_current(FileId::new(1), 0, 5).unwrap();
        stamps.set_current(FileId::new(1), 1, 5).unwrap();
        stamps.set_current(FileId::new(2), 0, 5).unwrap();
        stamps.flush_all().unwrap();

        stamps.wipe_index(0).unwrap();
        assert!(!stamps.is_current(FileId::new(1), 0, 5).unwrap());
        assert!(!stamps.is_current(FileId::new(2), 0, 5).unwrap());
        assert!(stamps.is_current(FileId::new(1), 1, 5).unwrap());
    }
}
