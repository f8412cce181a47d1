//! # Sift Core Library
//!
//! Incremental inverted-index engine: a set of named, persistent indices
//! over a mutable corpus of tracked files, kept consistent as files are
//! added, edited, and removed — without re-scanning the corpus per query.
//!
//! ## Architecture
//!
//! - **Types** (`types`): ids, masks, versions, scopes
//! - **Changes** (`changes`): coalescing merger of raw file events
//! - **Stamps** (`stamps`): per-(file, index) staleness markers
//! - **Storage** (`storage`): durable key→container store + buffered overlay
//! - **Snapshot** (`snapshot`): content-addressed cache of indexing results
//! - **Rebuild** (`rebuild`): per-index rebuild flags
//! - **Registry** (`registry`): frozen table of index definitions
//! - **Engine** (`engine`): the orchestrator tying it all together
//! - **Corpus** (`corpus`): the host-facing file source seam
//! - **Config** (`config`): engine and host configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use sift_core::{EngineBuilder, IndexDefinition, MemoryCorpus, Scope};
//! use std::sync::Arc;
//!
//! let corpus = Arc::new(MemoryCorpus::new());
//! let engine = EngineBuilder::new("./index-root", corpus.clone())
//!     .register(IndexDefinition::new("words", 1, |input| {
//!         // split content into word keys...
//!         Ok(Default::default())
//!     }))
//!     .open()?;
//!
//! engine.ensure_up_to_date(&"words".into(), &Scope::Everything)?;
//! let files = engine.get_containing_files(&"words".into(), b"hello", &Scope::Everything)?;
//! ```

pub mod changes;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod forward;
mod persist;
pub mod rebuild;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod stamps;
pub mod storage;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use config::{Config, EngineConfig};
pub use corpus::{Corpus, MemoryCorpus};
pub use engine::{Engine, EngineBuilder, IndexStatus};
pub use error::{Result, SiftError};
pub use registry::{
    typed_index, DiffMode, IndexDefinition, IndexInput, KeyExternalizer, StringExternalizer,
    U32Externalizer, UnitExternalizer, ValueExternalizer,
};
pub use snapshot::{HashedInputData, InputMap};
pub use types::{
    CancelToken, ChangeMask, FileId, FileMeta, IndexName, IndexVersion, KeyBytes, Scope,
    ValueBytes, ENGINE_VERSION,
};
