//! Per-index version records.
//!
//! Each index persists an [`IndexVersion`] in its own `version.bin`. The
//! record's modification count is the index's *live creation stamp*: every
//! per-file stamp equal to it means "current", anything else means stale.
//! Rewriting the version therefore invalidates all previously-current
//! per-file stamps at once, without touching them.

use crate::error::Result;
use crate::persist;
use crate::types::{IndexName, IndexVersion};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const VERSION_MAGIC: &[u8; 4] = b"SVER";

/// Outcome of comparing a stored version against a registered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// No version file on disk; the index has never been built.
    Missing,
    /// Stored version matches the registered schema and engine version.
    Matches,
    /// Schema or engine version changed; the index is stale in its entirety.
    Mismatch,
}

/// Loads, caches, and rewrites per-index version files.
#[derive(Debug)]
pub struct VersionStore {
    root: PathBuf,
    cache: DashMap<IndexName, IndexVersion>,
}

impl VersionStore {
    /// Create a store rooted at the engine directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        VersionStore {
            root: root.as_ref().to_path_buf(),
            cache: DashMap::new(),
        }
    }

    fn version_path(&self, index: &IndexName) -> PathBuf {
        self.root.join(index.as_str()).join("version.bin")
    }

    /// Get the stored version, reading from disk on first access.
    pub fn get(&self, index: &IndexName) -> Result<Option<IndexVersion>> {
        if let Some(cached) = self.cache.get(index) {
            return Ok(Some(*cached));
        }
        match persist::load::<IndexVersion>(&self.version_path(index), VERSION_MAGIC)? {
            Some(version) => {
                self.cache.insert(index.clone(), version);
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    /// The live creation stamp of an index, if it has ever been built.
    pub fn creation_stamp(&self, index: &IndexName) -> Result<Option<u64>> {
        Ok(self.get(index)?.map(|v| v.modification_count))
    }

    /// Compare the stored version against the registered schema.
    pub fn check(&self, index: &IndexName, schema_version: u32) -> Result<VersionCheck> {
        match self.get(index)? {
            None => Ok(VersionCheck::Missing),
            Some(v) if v.matches(schema_version) => Ok(VersionCheck::Matches),
            Some(_) => Ok(VersionCheck::Mismatch),
        }
    }

    /// Rewrite the version for a (re)built index.
    ///
    /// The new modification count is `max(now, previous + 1)`, so it
    /// strictly increases across every rewrite, even across restarts.
    pub fn rewrite(&self, index: &IndexName, schema_version: u32) -> Result<IndexVersion> {
        let next = match self.get(index)? {
            Some(previous) => previous.rewritten(schema_version),
            None => IndexVersion::initial(schema_version),
        };
        persist::save(&self.version_path(index), VERSION_MAGIC, &next)?;
        self.cache.insert(index.clone(), next);
        info!(
            index = %index,
            schema = schema_version,
            stamp = next.modification_count,
            "index version rewritten"
        );
        Ok(next)
    }

    /// Drop the cached entry (used when an index directory is wiped).
    pub fn evict(&self, index: &IndexName) {
        self.cache.remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ENGINE_VERSION;
    use tempfile::TempDir;

    #[test]
    fn test_missing_then_rewrite() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(dir.path());
        let name = IndexName::from("tokens");

        assert_eq!(store.check(&name, 1).unwrap(), VersionCheck::Missing);

        let v = store.rewrite(&name, 1).unwrap();
        assert_eq!(v.schema_version, 1);
        assert_eq!(v.engine_version, ENGINE_VERSION);
        assert_eq!(store.check(&name, 1).unwrap(), VersionCheck::Matches);
        assert_eq!(store.check(&name, 2).unwrap(), VersionCheck::Mismatch);
    }

    #[test]
    fn test_stamp_strictly_increases_across_reopen() {
        let dir = TempDir::new().unwrap();
        let name = IndexName::from("tokens");

        let first = {
            let store = VersionStore::new(dir.path());
            store.rewrite(&name, 1).unwrap()
        };

        // A fresh store (simulating a restart) must still move forward.
        let store = VersionStore::new(dir.path());
        let second = store.rewrite(&name, 1).unwrap();
        assert!(second.modification_count > first.modification_count);
    }

    #[test]
    fn test_cached_after_first_read() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(dir.path());
        let name = IndexName::from("tokens");
        store.rewrite(&name, 1).unwrap();

        let a = store.creation_stamp(&name).unwrap();
        // Deleting the file behind the cache must not affect reads.
        std::fs::remove_file(dir.path().join("tokens").join("version.bin")).unwrap();
        let b = store.creation_stamp(&name).unwrap();
        assert_eq!(a, b);
    }
}
