//! # Sift Trigram Search
//!
//! A derived query layer over `sift-core`: a trigram index with a
//! no-value payload, substring search by trigram-candidate intersection,
//! and multi-filter intersection across independent indices.
//!
//! ## How substring search works
//!
//! 1. **Trigram Index** - 3-byte windows of lowercased content become
//!    `u32` keys; presence of a file under a key is the stored fact
//! 2. **Candidate narrowing** - a query decomposes into the same codes;
//!    the candidate set is the intersection over all required codes
//! 3. **Verification** - the precise, case-insensitive predicate runs
//!    only on candidates, discarding collision false positives
//!
//! Needles shorter than one trigram fall back to a full content scan
//! with the precise predicate.

pub mod filter;
pub mod index;
pub mod search;
pub mod trigram;

pub use filter::{files_with_all_keys, files_with_any_key, intersect_filters, FilterSet};
pub use index::{key_of, trigram_index, TRIGRAM_SCHEMA_VERSION};
pub use search::SubstringSearcher;
pub use trigram::{contains_ignore_case, is_binary, trigrams_of, MIN_NEEDLE_LEN};
