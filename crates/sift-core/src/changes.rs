//! Change merger: coalesces raw per-file events into one pending change
//! record per file id.
//!
//! The merger sits between the host's file watcher and the orchestrator.
//! Events for the same file fold into a single [`ChangeMask`]; a `removed`
//! event supersedes any prior pending add or content change, so a remove is
//! never lost behind a later add for a different incarnation of the id.
//!
//! ## Concurrency
//!
//! Records live in a sharded concurrent map. `record_change` merges inside
//! the shard's entry lock, so no update is dropped under concurrent
//! writers. `process_changes` takes a snapshot of the currently-known file
//! ids before iterating: changes arriving during processing are not
//! required to be seen in that pass and are picked up by the next call.

use crate::types::{CancelToken, ChangeMask, FileId};
use dashmap::DashMap;
use tracing::trace;

/// Coalescing queue of pending per-file changes.
#[derive(Debug, Default)]
pub struct ChangeMerger {
    changes: DashMap<FileId, ChangeMask>,
}

impl ChangeMerger {
    /// Create an empty merger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or merge a pending change for a file.
    pub fn record_change(&self, file: FileId, mask: ChangeMask) {
        trace!(file = %file, mask = %mask, "recording change");
        self.changes
            .entry(file)
            .and_modify(|existing| *existing = existing.merge(mask))
            .or_insert(mask);
    }

    /// True if any change is pending.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Approximate number of pending per-file records.
    pub fn approximate_count(&self) -> usize {
        self.changes.len()
    }

    /// Atomically drain pending changes through `visitor`.
    ///
    /// Each drained record is removed from the queue before the visitor
    /// sees it. If the visitor returns `false`, or the token is cancelled,
    /// the pass stops early; the record that aborted the pass is merged
    /// back so it is re-queued rather than lost. Returns `true` if the
    /// pass visited every snapshotted record.
    pub fn process_changes<F>(&self, cancel: &CancelToken, mut visitor: F) -> bool
    where
        F: FnMut(FileId, ChangeMask) -> bool,
    {
        let snapshot: Vec<FileId> = self.changes.iter().map(|entry| *entry.key()).collect();

        for file in snapshot {
            // A concurrent drain may have taken this record already.
            let Some((_, mask)) = self.changes.remove(&file) else {
                continue;
            };

            if cancel.is_cancelled() || !visitor(file, mask) {
                self.record_change(file, mask);
                return false;
            }
        }

        true
    }
}
