//! Error types for Sift core operations.
//!
//! This module defines well-structured error types using `thiserror` for
//! library-level errors, while higher-level code can use `anyhow` for
//! convenient error handling.

use crate::types::{FileId, IndexName};
use thiserror::Error;

/// Result type alias using SiftError
pub type Result<T> = std::result::Result<T, SiftError>;

/// Core error types for Sift operations.
///
/// These errors represent specific failure modes that callers may want to
/// handle differently (e.g., scheduling a rebuild on storage corruption,
/// treating `RebuildPending` results as "unknown" rather than "empty").
#[derive(Error, Debug)]
pub enum SiftError {
    // === Storage Errors ===
    /// A persistent store exists but is corrupted or unreadable
    #[error("storage corrupted: {reason}")]
    StorageCorrupted { reason: String },

    /// The stored format version doesn't match the expected version
    #[error("version mismatch for index {index}: found {found}, expected {expected}")]
    VersionMismatch {
        index: IndexName,
        found: u32,
        expected: u32,
    },

    // === Orchestration Errors ===
    /// The index has a pending rebuild; results are unknown, not empty
    #[error("index {index} has a pending rebuild")]
    RebuildPending { index: IndexName },

    /// No index is registered under this name
    #[error("unknown index: {name}")]
    UnknownIndex { name: IndexName },

    /// A registered indexer function failed for one file
    #[error("indexer {index} failed on file {file}: {reason}")]
    IndexerFailed {
        index: IndexName,
        file: FileId,
        reason: String,
    },

    /// The current run was cooperatively cancelled
    #[error("indexing run cancelled")]
    Cancelled,

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    // === Internal Errors ===
    /// Internal error that should not happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl SiftError {
    /// Returns true if this error's root cause is a storage fault that
    /// should trigger a rebuild of the affected index rather than a hard
    /// failure for the caller.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            SiftError::StorageCorrupted { .. }
                | SiftError::VersionMismatch { .. }
                | SiftError::Io(_)
                | SiftError::Serialization(_)
        )
    }

    /// Returns true if this error is a cooperative cancellation, which is
    /// not a failure: applied per-file state is kept.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SiftError::Cancelled)
    }

    /// Create a storage corruption error
    pub fn corrupted(reason: impl Into<String>) -> Self {
        SiftError::StorageCorrupted {
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        SiftError::Serialization(reason.into())
    }
}

impl From<bincode::Error> for SiftError {
    fn from(err: bincode::Error) -> Self {
        SiftError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_rebuild() {
        let err = SiftError::corrupted("bad footer");
        assert!(err.requires_rebuild());

        let err = SiftError::VersionMismatch {
            index: IndexName::from("tokens"),
            found: 1,
            expected: 2,
        };
        assert!(err.requires_rebuild());

        let err = SiftError::UnknownIndex {
            name: IndexName::from("missing"),
        };
        assert!(!err.requires_rebuild());

        let err = SiftError::Cancelled;
        assert!(!err.requires_rebuild());
        assert!(err.is_cancelled());
    }
}
