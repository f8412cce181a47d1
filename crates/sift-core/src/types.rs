//! Core data types for the Sift engine.
//!
//! This module defines the fundamental types shared by every engine
//! component. These types are designed to be:
//!
//! - **Serializable**: For persistence to disk
//! - **Cheap to copy**: Ids and masks are small `Copy` types
//! - **Host-agnostic**: No assumptions about where tracked files come from

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Engine-level keys are opaque byte strings; typed indices attach
/// externalizers at registration (see `registry`).
pub type KeyBytes = Vec<u8>;

/// Engine-level values are opaque byte strings.
pub type ValueBytes = Vec<u8>;

/// Stable identifier of a tracked file.
///
/// The host assigns raw ids as signed integers. Positive ids are first-class
/// members of the id space and may be persisted against. Non-positive ids
/// denote *virtual* files (in-memory only documents, scratch buffers); they
/// are masked into a reserved range so the engine can track them in memory,
/// but they are never written to any persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// Tag bit marking a masked virtual id.
const VIRTUAL_BIT: u32 = 1 << 31;

impl FileId {
    /// Create a file id from a known-positive raw id.
    pub fn new(id: u32) -> Self {
        FileId(id)
    }

    /// Map a raw host id into the engine's id space.
    ///
    /// Non-positive raw ids are folded into the virtual range.
    pub fn from_raw(raw: i64) -> Self {
        if raw > 0 {
            FileId(raw as u32)
        } else {
            FileId(VIRTUAL_BIT | ((-raw) as u32 & !VIRTUAL_BIT))
        }
    }

    /// Get the raw id value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// True if this id was masked from a non-positive host id.
    ///
    /// Virtual ids never reach the persistent stores.
    pub fn is_virtual(&self) -> bool {
        self.0 & VIRTUAL_BIT != 0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual() {
            write!(f, "virtual:{}", self.0 & !VIRTUAL_BIT)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Globally unique name of a registered index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexName(pub String);

impl IndexName {
    /// Create a new index name.
    pub fn new(name: impl Into<String>) -> Self {
        IndexName(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IndexName {
    fn from(s: &str) -> Self {
        IndexName(s.to_string())
    }
}

impl From<String> for IndexName {
    fn from(s: String) -> Self {
        IndexName(s)
    }
}

/// Pending-change bit mask for a single file.
///
/// Masks for the same file merge by OR-ing bits, except that `REMOVED`
/// supersedes everything else: a remove must never be lost behind a later
/// add for a different incarnation of the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMask(pub u8);

impl ChangeMask {
    /// File appeared in the corpus.
    pub const ADDED: Self = ChangeMask(1);
    /// File left the corpus. Dominates every other bit on merge.
    pub const REMOVED: Self = ChangeMask(2);
    /// File content changed.
    pub const CONTENT_CHANGED: Self = ChangeMask(4);
    /// Content is about to change (pre-event from the watcher).
    pub const BEFORE_CONTENT_CHANGED: Self = ChangeMask(8);
    /// Transient (unsaved/in-editor) state changed.
    pub const TRANSIENT_CHANGED: Self = ChangeMask(16);

    /// Merge another mask into this one. `REMOVED` wins.
    pub fn merge(self, other: ChangeMask) -> ChangeMask {
        if self.contains(Self::REMOVED) || other.contains(Self::REMOVED) {
            Self::REMOVED
        } else {
            ChangeMask(self.0 | other.0)
        }
    }

    /// Check whether all bits of `other` are set.
    pub fn contains(self, other: ChangeMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if the remove bit is set.
    pub fn is_removed(self) -> bool {
        self.contains(Self::REMOVED)
    }

    /// True if the change touches durable content (not just transient state).
    pub fn touches_content(self) -> bool {
        self.0 & (Self::ADDED.0 | Self::REMOVED.0 | Self::CONTENT_CHANGED.0) != 0
    }
}

impl fmt::Display for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::ADDED) {
            parts.push("added");
        }
        if self.contains(Self::REMOVED) {
            parts.push("removed");
        }
        if self.contains(Self::CONTENT_CHANGED) {
            parts.push("content");
        }
        if self.contains(Self::BEFORE_CONTENT_CHANGED) {
            parts.push("before_content");
        }
        if self.contains(Self::TRANSIENT_CHANGED) {
            parts.push("transient");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Engine on-disk format version.
///
/// Bumped whenever any persistent layout changes; a stored index written
/// with a different engine version is stale in its entirety.
pub const ENGINE_VERSION: u32 = 1;

/// Version record of one index, persisted in its `version.bin` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexVersion {
    /// Schema version declared at registration.
    pub schema_version: u32,

    /// Engine format version at write time.
    pub engine_version: u32,

    /// Wall-clock timestamp (ms) when this index's corpus state was created.
    pub corpus_created_at: u64,

    /// Strictly increasing across every rewrite, even across restarts.
    /// This is the live creation stamp per-file stamps are compared against.
    pub modification_count: u64,
}

impl IndexVersion {
    /// Create the initial version record for a freshly built index.
    pub fn initial(schema_version: u32) -> Self {
        let now = wall_clock_ms();
        IndexVersion {
            schema_version,
            engine_version: ENGINE_VERSION,
            corpus_created_at: now,
            modification_count: now,
        }
    }

    /// Produce the successor version after a rewrite.
    ///
    /// The modification count is seeded from `max(now, previous + 1)` so it
    /// strictly increases even if the wall clock goes backwards.
    pub fn rewritten(&self, schema_version: u32) -> Self {
        let now = wall_clock_ms();
        IndexVersion {
            schema_version,
            engine_version: ENGINE_VERSION,
            corpus_created_at: now,
            modification_count: now.max(self.modification_count + 1),
        }
    }

    /// True if this stored version matches what the registered index expects.
    pub fn matches(&self, schema_version: u32) -> bool {
        self.schema_version == schema_version && self.engine_version == ENGINE_VERSION
    }
}

/// Current wall clock in milliseconds since the epoch.
pub(crate) fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Restriction on which files an operation considers.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Every tracked file.
    Everything,
    /// Only the given files.
    Files(HashSet<FileId>),
}

impl Scope {
    /// Build a scope from an explicit file list.
    pub fn files(ids: impl IntoIterator<Item = FileId>) -> Self {
        Scope::Files(ids.into_iter().collect())
    }

    /// Check whether a file is inside this scope.
    pub fn contains(&self, id: FileId) -> bool {
        match self {
            Scope::Everything => true,
            Scope::Files(set) => set.contains(&id),
        }
    }
}

/// Cooperative cancellation signal for indexing runs.
///
/// Checked between files, never mid-file: a cancelled run keeps every
/// per-file update it already committed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check the flag.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Host-supplied metadata about a tracked file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// The file's engine id.
    pub id: FileId,

    /// Display path, used by input filters and logging.
    pub path: String,

    /// Content length in bytes.
    pub len: u64,

    /// False once the file has left the corpus.
    pub is_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_id_masking() {
        let real = FileId::from_raw(42);
        assert!(!real.is_virtual());
        assert_eq!(real.as_u32(), 42);

        let virt = FileId::from_raw(-7);
        assert!(virt.is_virtual());
        assert_ne!(virt, real);

        let zero = FileId::from_raw(0);
        assert!(zero.is_virtual());
    }

    #[test]
    fn test_mask_merge_or() {
        let merged = ChangeMask::ADDED.merge(ChangeMask::CONTENT_CHANGED);
        assert!(merged.contains(ChangeMask::ADDED));
        assert!(merged.contains(ChangeMask::CONTENT_CHANGED));
        assert!(!merged.is_removed());
    }

    #[test]
    fn test_mask_merge_removed_wins() {
        let merged = ChangeMask::REMOVED.merge(ChangeMask::ADDED);
        assert_eq!(merged, ChangeMask::REMOVED);

        let merged = ChangeMask::CONTENT_CHANGED.merge(ChangeMask::REMOVED);
        assert_eq!(merged, ChangeMask::REMOVED);
    }

    #[test]
    fn test_version_monotonic() {
        let v1 = IndexVersion::initial(1);
        let v2 = v1.rewritten(1);
        let v3 = v2.rewritten(2);
        assert!(v2.modification_count > v1.modification_count);
        assert!(v3.modification_count > v2.modification_count);
        assert!(v1.matches(1));
        assert!(!v3.matches(1));
    }

    #[test]
    fn test_scope() {
        let scope = Scope::files([FileId::new(1), FileId::new(2)]);
        assert!(scope.contains(FileId::new(1)));
        assert!(!scope.contains(FileId::new(3)));
        assert!(Scope::Everything.contains(FileId::new(99)));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
