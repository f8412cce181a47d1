//! Substring search over a trigram index.
//!
//! A query decomposes into the same trigram codes used at index time.
//! The candidate set is the intersection of the file sets of every
//! required code; the precise match predicate then runs only on that
//! small candidate set, eliminating false positives from code
//! collisions. Needles too short to decompose fall back to a full
//! content scan with the precise predicate.

use crate::index::key_of;
use crate::trigram::{contains_ignore_case, trigrams_of, MIN_NEEDLE_LEN};
use sift_core::{Corpus, Engine, FileId, IndexName, Result, Scope, SiftError};
use std::sync::Arc;
use tracing::debug;

/// Substring searcher bound to one trigram index.
pub struct SubstringSearcher {
    engine: Arc<Engine>,
    corpus: Arc<dyn Corpus>,
    index: IndexName,
}

impl SubstringSearcher {
    /// Create a searcher over `index`, verifying candidates against
    /// `corpus` content.
    pub fn new(engine: Arc<Engine>, corpus: Arc<dyn Corpus>, index: impl Into<IndexName>) -> Self {
        SubstringSearcher {
            engine,
            corpus,
            index: index.into(),
        }
    }

    /// Files whose content contains `needle`, case-insensitively.
    pub fn files_containing(&self, needle: &str, scope: &Scope) -> Result<Vec<FileId>> {
        if needle.len() < MIN_NEEDLE_LEN {
            debug!(needle, "needle too short for trigrams; full scan");
            return self.full_scan(needle, scope);
        }

        let codes = trigrams_of(needle);
        if codes.is_empty() {
            return self.full_scan(needle, scope);
        }
        let keys: Vec<Vec<u8>> = codes.into_iter().map(key_of).collect();

        let mut candidates = Vec::new();
        self.engine
            .process_files_containing_all_keys(&self.index, &keys, scope, |file, _| {
                candidates.push(file);
                true
            })?;
        debug!(needle, candidates = candidates.len(), "verifying trigram candidates");

        let mut matches = Vec::new();
        for file in candidates {
            if self.content_matches(file, needle)? {
                matches.push(file);
            }
        }
        matches.sort_unstable();
        Ok(matches)
    }

    /// True if at least one in-scope file contains `needle`.
    pub fn any_file_contains(&self, needle: &str, scope: &Scope) -> Result<bool> {
        Ok(!self.files_containing(needle, scope)?.is_empty())
    }

    fn full_scan(&self, needle: &str, scope: &Scope) -> Result<Vec<FileId>> {
        let mut matches = Vec::new();
        for file in self.corpus.all_files() {
            if !scope.contains(file) {
                continue;
            }
            if self.content_matches(file, needle)? {
                matches.push(file);
            }
        }
        matches.sort_unstable();
        Ok(matches)
    }

    fn content_matches(&self, file: FileId, needle: &str) -> Result<bool> {
        let content = self
            .corpus
            .content(file)
            .map_err(|e| SiftError::Internal(format!("content read failed: {e}")))?;
        let Some(content) = content else {
            return Ok(false);
        };
        let text = String::from_utf8_lossy(&content);
        Ok(contains_ignore_case(&text, needle))
    }
}
