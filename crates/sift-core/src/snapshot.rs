//! Content-addressed cache of indexing results.
//!
//! Many tracked files share identical content (generated or templated
//! files); running an indexer once per distinct content is enough. The
//! cache keys computed key/value maps by a blake3 hash of the input,
//! discriminated by index name and schema version so distinct indices
//! never collide in one hash space. Indices may hash *normalized* content
//! (see `IndexDefinition::normalize`) so the hash tracks what the indexer
//! actually saw, not raw bytes.
//!
//! Two persistent maps:
//!
//! - the **forward map**: (index ordinal, file id) → content-hash id, the
//!   per-file handle into the shared store (this doubles as the forward
//!   index of content-addressed indices)
//! - the **contents map**: content-hash id → key/value map, shared across
//!   files and append-only once a hash id's entry is written
//!
//! `put_data` is idempotent: re-storing an existing hash is a no-op.

use crate::error::Result;
use crate::persist;
use crate::types::{FileId, KeyBytes, ValueBytes};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const FORWARD_MAGIC: &[u8; 4] = b"SFWD";
const CONTENTS_MAGIC: &[u8; 4] = b"SCNT";

/// The key/value map one indexer run produced for one input.
pub type InputMap = HashMap<KeyBytes, ValueBytes>;

/// A computed input map together with its content-hash handle.
#[derive(Debug, Clone)]
pub struct HashedInputData {
    /// Dense id of the content hash in the shared contents map.
    pub hash_id: u64,
    /// The indexing result for that content.
    pub map: InputMap,
}

/// Compute the content hash for one index's view of some content.
///
/// The discriminator (index name + schema version) is folded in so the
/// same bytes seen by two indices produce two distinct hashes.
pub fn content_hash(index_name: &str, schema_version: u32, content: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(index_name.as_bytes());
    hasher.update(&schema_version.to_le_bytes());
    hasher.update(&(content.len() as u64).to_le_bytes());
    hasher.update(content);
    *hasher.finalize().as_bytes()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContentsState {
    by_hash: HashMap<[u8; 32], u64>,
    maps: HashMap<u64, InputMap>,
    next_id: u64,
}

/// Shared snapshot mapping cache, one per engine root.
pub struct SnapshotCache {
    forward_path: PathBuf,
    contents_path: PathBuf,
    forward: Mutex<HashMap<(u16, u32), u64>>,
    contents: RwLock<ContentsState>,
    dirty: AtomicBool,
}

impl SnapshotCache {
    /// Open the cache under `<dir>/forward.bin` and `<dir>/contents.bin`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let forward_path = dir.join("forward.bin");
        let contents_path = dir.join("contents.bin");

        let forward = persist::load::<HashMap<(u16, u32), u64>>(&forward_path, FORWARD_MAGIC)?
            .unwrap_or_default();
        let contents =
            persist::load::<ContentsState>(&contents_path, CONTENTS_MAGIC)?.unwrap_or_default();

        debug!(
            entries = forward.len(),
            contents = contents.maps.len(),
            "snapshot cache opened"
        );

        Ok(SnapshotCache {
            forward_path,
            contents_path,
            forward: Mutex::new(forward),
            contents: RwLock::new(contents),
            dirty: AtomicBool::new(false),
        })
    }

    /// Look up a previously computed result by content hash.
    pub fn lookup(&self, hash: &[u8; 32]) -> Option<HashedInputData> {
        let contents = self.contents.read();
        let id = *contents.by_hash.get(hash)?;
        let map = contents.maps.get(&id)?.clone();
        Some(HashedInputData { hash_id: id, map })
    }

    /// Read a cached result by its dense hash id.
    pub fn read_data(&self, hash_id: u64) -> Option<InputMap> {
        self.contents.read().maps.get(&hash_id).cloned()
    }

    /// Store a computed result keyed by content hash.
    ///
    /// Idempotent: if the hash is already present its existing entry is
    /// returned untouched — the contents map is append-only.
    pub fn put_data(&self, hash: [u8; 32], map: InputMap) -> HashedInputData {
        let mut contents = self.contents.write();
        if let Some(&id) = contents.by_hash.get(&hash) {
            let existing = contents.maps.get(&id).cloned().unwrap_or_default();
            return HashedInputData {
                hash_id: id,
                map: existing,
            };
        }
        let id = contents.next_id;
        contents.next_id += 1;
        contents.by_hash.insert(hash, id);
        contents.maps.insert(id, map.clone());
        self.dirty.store(true, Ordering::Release);
        HashedInputData { hash_id: id, map }
    }

    /// The content-hash id a file's last indexing run resolved to.
    pub fn forward(&self, ordinal: u16, file: FileId) -> Option<u64> {
        self.forward.lock().get(&(ordinal, file.as_u32())).copied()
    }

    /// Point a file's forward entry at a content-hash id.
    pub fn set_forward(&self, ordinal: u16, file: FileId, hash_id: u64) {
        if file.is_virtual() {
            return;
        }
        self.forward.lock().insert((ordinal, file.as_u32()), hash_id);
        self.dirty.store(true, Ordering::Release);
    }

    /// Drop a file's forward entry (file removed or no longer indexable).
    pub fn remove_forward(&self, ordinal: u16, file: FileId) {
        self.forward.lock().remove(&(ordinal, file.as_u32()));
        self.dirty.store(true, Ordering::Release);
    }

    /// Drop every forward entry of one index (full rebuild). The shared
    /// contents map is left alone: other indices may reference it and
    /// entries are reusable by the rebuild itself.
    pub fn wipe_index(&self, ordinal: u16) {
        self.forward.lock().retain(|&(o, _), _| o != ordinal);
        self.dirty.store(true, Ordering::Release);
    }

    /// Number of distinct cached contents (for diagnostics and tests).
    pub fn distinct_contents(&self) -> usize {
        self.contents.read().maps.len()
    }

    /// Persist both maps if anything changed.
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let forward = self.forward.lock();
            persist::save(&self.forward_path, FORWARD_MAGIC, &*forward)?;
        }
        {
            let contents = self.contents.read();
            persist::save(&self.contents_path, CONTENTS_MAGIC, &*contents)?;
        }
        Ok(())
    }
}
