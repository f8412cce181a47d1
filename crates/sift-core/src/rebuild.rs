//! Per-index rebuild flags.
//!
//! One flag per registered index, defaulting to "ok". A version bump or a
//! storage fault flips the flag; the next full pass clears the index's
//! backing state exactly once and flips it back. Concurrent callers racing
//! for the same clear serialize on the index's own mutex so the backend is
//! cleared once, not once per racer.

use crate::error::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Ok,
    RequiresRebuild,
}

/// Tracks which indices need a full rebuild.
#[derive(Debug, Default)]
pub struct RebuildTracker {
    flags: DashMap<u16, Flag>,
    clear_locks: DashMap<u16, Arc<Mutex<()>>>,
}

impl RebuildTracker {
    /// Create a tracker with every index "ok".
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no rebuild is pending for this index.
    pub fn is_ok(&self, ordinal: u16) -> bool {
        self.flags
            .get(&ordinal)
            .map(|f| *f == Flag::Ok)
            .unwrap_or(true)
    }

    /// Request a rebuild. Returns true the first time for a pending
    /// episode, letting the caller log the transition exactly once.
    pub fn request_rebuild(&self, ordinal: u16) -> bool {
        let mut entry = self.flags.entry(ordinal).or_insert(Flag::Ok);
        if *entry == Flag::Ok {
            *entry = Flag::RequiresRebuild;
            true
        } else {
            false
        }
    }

    /// If a rebuild is pending, run `clear_fn` exactly once and flip the
    /// flag back to "ok". Returns true if a clear actually ran.
    ///
    /// Racing callers serialize on a per-index mutex; the losers observe
    /// the already-cleared flag and do nothing.
    pub fn clear_if_necessary(
        &self,
        ordinal: u16,
        clear_fn: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        let lock = self
            .clear_locks
            .entry(ordinal)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        if self.is_ok(ordinal) {
            return Ok(false);
        }
        clear_fn()?;
        self.flags.insert(ordinal, Flag::Ok);
        Ok(true)
    }
}
