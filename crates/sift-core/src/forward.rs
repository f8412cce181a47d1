//! Per-index forward index: file id → the input map it last produced.
//!
//! The inverted storage answers "which files produced this key"; updating
//! a file also needs the reverse — "which keys did this file produce last
//! time" — to compute a removal diff. Non-content-addressed indices keep
//! the previous input map inline here; content-addressed indices keep only
//! a hash reference in the shared snapshot cache, so their slot in this
//! store stays empty.

use crate::error::Result;
use crate::persist;
use crate::snapshot::InputMap;
use crate::types::FileId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const FORWARD_MAGIC: &[u8; 4] = b"SFWI";

/// Durable file → previous-input map for one index.
pub struct ForwardIndex {
    path: PathBuf,
    map: Mutex<HashMap<u32, InputMap>>,
    dirty: AtomicBool,
}

impl ForwardIndex {
    /// Open (or create) the forward index at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map =
            persist::load::<HashMap<u32, InputMap>>(&path, FORWARD_MAGIC)?.unwrap_or_default();
        Ok(ForwardIndex {
            path,
            map: Mutex::new(map),
            dirty: AtomicBool::new(false),
        })
    }

    /// The input map this file produced on its last successful update.
    pub fn get(&self, file: FileId) -> Option<InputMap> {
        self.map.lock().get(&file.as_u32()).cloned()
    }

    /// Record a file's new input map; an empty map deletes the entry.
    pub fn put(&self, file: FileId, input: InputMap) {
        if file.is_virtual() {
            return;
        }
        let mut map = self.map.lock();
        if input.is_empty() {
            map.remove(&file.as_u32());
        } else {
            map.insert(file.as_u32(), input);
        }
        self.dirty.store(true, Ordering::Release);
    }

    /// Drop a file's entry.
    pub fn remove(&self, file: FileId) {
        self.map.lock().remove(&file.as_u32());
        self.dirty.store(true, Ordering::Release);
    }

    /// Persist pending writes, if any.
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let map = self.map.lock();
        persist::save(&self.path, FORWARD_MAGIC, &*map)
    }

    /// Drop all data, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.map.lock().clear();
        self.dirty.store(false, Ordering::Release);
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
