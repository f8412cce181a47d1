//! Multi-filter intersection across independent indices.
//!
//! Each filter resolves to a file-id set against its own index; an absent
//! filter contributes no restriction, not an empty set. Present sets
//! intersect.

use sift_core::{Engine, FileId, IndexName, KeyBytes, Result, Scope};
use std::collections::HashSet;

/// The restriction one filter contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSet {
    /// The filter was absent: no restriction.
    Unrestricted,
    /// Only these files pass the filter.
    Files(HashSet<FileId>),
}

impl FilterSet {
    /// Intersect with another restriction.
    pub fn and(self, other: FilterSet) -> FilterSet {
        match (self, other) {
            (FilterSet::Unrestricted, other) => other,
            (this, FilterSet::Unrestricted) => this,
            (FilterSet::Files(a), FilterSet::Files(b)) => {
                FilterSet::Files(a.intersection(&b).copied().collect())
            }
        }
    }

    /// Sorted file list, or `None` when unrestricted.
    pub fn into_files(self) -> Option<Vec<FileId>> {
        match self {
            FilterSet::Unrestricted => None,
            FilterSet::Files(set) => {
                let mut files: Vec<FileId> = set.into_iter().collect();
                files.sort_unstable();
                Some(files)
            }
        }
    }
}

/// Intersect a list of optional per-filter restrictions. Filters that are
/// `None` (not supplied) are skipped entirely.
pub fn intersect_filters(sets: impl IntoIterator<Item = Option<FilterSet>>) -> FilterSet {
    sets.into_iter()
        .flatten()
        .fold(FilterSet::Unrestricted, FilterSet::and)
}

/// Files containing *all* of `keys` in `index`.
pub fn files_with_all_keys(
    engine: &Engine,
    index: &IndexName,
    keys: &[KeyBytes],
    scope: &Scope,
) -> Result<FilterSet> {
    let mut files = HashSet::new();
    engine.process_files_containing_all_keys(index, keys, scope, |file, _| {
        files.insert(file);
        true
    })?;
    Ok(FilterSet::Files(files))
}

/// Files containing *any* of `keys` in `index`.
pub fn files_with_any_key(
    engine: &Engine,
    index: &IndexName,
    keys: &[KeyBytes],
    scope: &Scope,
) -> Result<FilterSet> {
    let mut files = HashSet::new();
    for key in keys {
        for file in engine.get_containing_files(index, key, scope)? {
            files.insert(file);
        }
    }
    Ok(FilterSet::Files(files))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u32]) -> FilterSet {
        FilterSet::Files(ids.iter().map(|&id| FileId::new(id)).collect())
    }

    #[test]
    fn test_intersection() {
        let combined = intersect_filters([Some(set(&[1, 2, 3])), Some(set(&[2, 3, 4]))]);
        assert_eq!(
            combined.into_files(),
            Some(vec![FileId::new(2), FileId::new(3)])
        );
    }

    #[test]
    fn test_absent_filter_is_no_restriction() {
        let combined = intersect_filters([None, Some(set(&[5, 6])), None]);
        assert_eq!(
            combined.into_files(),
            Some(vec![FileId::new(5), FileId::new(6)])
        );

        let unrestricted = intersect_filters([None, None]);
        assert_eq!(unrestricted, FilterSet::Unrestricted);
        assert_eq!(unrestricted.into_files(), None);
    }

    #[test]
    fn test_empty_set_restricts_to_nothing() {
        // An empty *present* set is a real restriction, unlike an absent
        // filter.
        let combined = intersect_filters([Some(set(&[])), Some(set(&[1]))]);
        assert_eq!(combined.into_files(), Some(Vec::new()));
    }
}
