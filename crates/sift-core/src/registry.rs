//! Index definitions and the frozen registration table.
//!
//! Hosts register every index up front; the builder freezes the set into
//! an immutable table with dense ordinals before the engine opens. There
//! is no runtime re-discovery: what is registered at startup is the closed
//! universe of indices.
//!
//! The engine works on opaque key/value bytes. Typed indices supply
//! [`KeyExternalizer`] / [`ValueExternalizer`] implementations at
//! registration, and [`typed_index`] wires a typed mapping function into a
//! byte-level [`IndexDefinition`].

use crate::error::{Result, SiftError};
use crate::snapshot::InputMap;
use crate::types::{FileMeta, IndexName, KeyBytes, ValueBytes};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// One file's input as handed to an indexer function.
#[derive(Debug)]
pub struct IndexInput<'a> {
    /// Metadata of the file being indexed.
    pub file: &'a FileMeta,
    /// The content the indexer should derive keys from.
    pub content: &'a [u8],
}

/// The per-index mapping function: content in, key/value map out.
pub type IndexerFn = dyn Fn(&IndexInput<'_>) -> Result<InputMap> + Send + Sync;

/// The per-index input filter: which files feed this index at all.
pub type FilterFn = dyn Fn(&FileMeta) -> bool + Send + Sync;

/// Optional content normalization applied before hashing for the snapshot
/// cache, so the hash tracks what the indexer actually sees.
pub type NormalizeFn = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

/// How a per-file update computes its storage diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Compare the full previous and next maps key by key.
    #[default]
    FullMap,
    /// The index produces at most one key per file; diffing reduces to
    /// "remove the old key, add the new one".
    SingleEntry,
}

/// Everything the engine needs to know about one registered index.
#[derive(Clone)]
pub struct IndexDefinition {
    /// Globally unique name; doubles as the index's directory name.
    pub name: IndexName,
    /// Schema version; bumping it invalidates the whole index.
    pub schema_version: u32,
    /// The mapping function.
    pub indexer: Arc<IndexerFn>,
    /// The input filter.
    pub filter: Arc<FilterFn>,
    /// Route indexing results through the shared snapshot cache.
    pub content_addressed: bool,
    /// Diff strategy for per-file updates.
    pub diff_mode: DiffMode,
    /// Optional normalization hook for snapshot-cache hashing.
    pub normalize: Option<Arc<NormalizeFn>>,
}

impl IndexDefinition {
    /// Create a definition with the default filter (every valid file),
    /// full-map diffing, and no content addressing.
    pub fn new(
        name: impl Into<IndexName>,
        schema_version: u32,
        indexer: impl Fn(&IndexInput<'_>) -> Result<InputMap> + Send + Sync + 'static,
    ) -> Self {
        IndexDefinition {
            name: name.into(),
            schema_version,
            indexer: Arc::new(indexer),
            filter: Arc::new(|meta: &FileMeta| meta.is_valid),
            content_addressed: false,
            diff_mode: DiffMode::FullMap,
            normalize: None,
        }
    }

    /// Restrict the index to files accepted by `filter`.
    pub fn with_filter(mut self, filter: impl Fn(&FileMeta) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Route results through the shared snapshot cache.
    pub fn content_addressed(mut self) -> Self {
        self.content_addressed = true;
        self
    }

    /// Declare the single-entry diff strategy.
    pub fn single_entry_diff(mut self) -> Self {
        self.diff_mode = DiffMode::SingleEntry;
        self
    }

    /// Hash normalized content instead of raw bytes.
    pub fn with_normalizer(
        mut self,
        normalize: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.normalize = Some(Arc::new(normalize));
        self
    }
}

impl std::fmt::Debug for IndexDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("name", &self.name)
            .field("schema_version", &self.schema_version)
            .field("content_addressed", &self.content_addressed)
            .field("diff_mode", &self.diff_mode)
            .finish()
    }
}

/// Serializes application keys to engine bytes and back.
pub trait KeyExternalizer<K>: Send + Sync {
    /// Encode a key.
    fn save(&self, key: &K) -> KeyBytes;
    /// Decode a key.
    fn read(&self, bytes: &[u8]) -> Result<K>;
}

/// Serializes application values to engine bytes and back.
pub trait ValueExternalizer<V>: Send + Sync {
    /// Encode a value.
    fn save(&self, value: &V) -> ValueBytes;
    /// Decode a value.
    fn read(&self, bytes: &[u8]) -> Result<V>;
}

/// UTF-8 string keys or values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringExternalizer;

impl KeyExternalizer<String> for StringExternalizer {
    fn save(&self, key: &String) -> KeyBytes {
        key.as_bytes().to_vec()
    }

    fn read(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SiftError::serialization(format!("invalid utf-8 key: {}", e)))
    }
}

impl ValueExternalizer<String> for StringExternalizer {
    fn save(&self, value: &String) -> ValueBytes {
        value.as_bytes().to_vec()
    }

    fn read(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SiftError::serialization(format!("invalid utf-8 value: {}", e)))
    }
}

/// Big-endian `u32` keys (n-gram codes and other dense numeric keys).
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Externalizer;

impl KeyExternalizer<u32> for U32Externalizer {
    fn save(&self, key: &u32) -> KeyBytes {
        key.to_be_bytes().to_vec()
    }

    fn read(&self, bytes: &[u8]) -> Result<u32> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| SiftError::serialization("u32 key must be 4 bytes"))?;
        Ok(u32::from_be_bytes(arr))
    }
}

/// No-value payload: presence of a file id under a key is the fact.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitExternalizer;

impl ValueExternalizer<()> for UnitExternalizer {
    fn save(&self, _value: &()) -> ValueBytes {
        Vec::new()
    }

    fn read(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Build a byte-level definition from a typed mapping function plus
/// externalizers.
pub fn typed_index<K, V, KE, VE, F>(
    name: impl Into<IndexName>,
    schema_version: u32,
    key_ext: KE,
    value_ext: VE,
    map_fn: F,
) -> IndexDefinition
where
    K: Eq + Hash,
    KE: KeyExternalizer<K> + 'static,
    VE: ValueExternalizer<V> + 'static,
    F: Fn(&IndexInput<'_>) -> Result<HashMap<K, V>> + Send + Sync + 'static,
{
    IndexDefinition::new(name, schema_version, move |input| {
        let typed = map_fn(input)?;
        let mut out = InputMap::with_capacity(typed.len());
        for (key, value) in &typed {
            out.insert(key_ext.save(key), value_ext.save(value));
        }
        Ok(out)
    })
}

/// The frozen, immutable table of registered indices.
pub struct IndexRegistry {
    defs: Vec<Arc<IndexDefinition>>,
    by_name: HashMap<IndexName, u16>,
}

impl IndexRegistry {
    /// Freeze a registration list. Duplicate names are rejected.
    pub fn freeze(definitions: Vec<IndexDefinition>) -> Result<Self> {
        let mut defs = Vec::with_capacity(definitions.len());
        let mut by_name = HashMap::with_capacity(definitions.len());
        for def in definitions {
            let ordinal = defs.len() as u16;
            if by_name.insert(def.name.clone(), ordinal).is_some() {
                return Err(SiftError::Internal(format!(
                    "duplicate index registration: {}",
                    def.name
                )));
            }
            defs.push(Arc::new(def));
        }
        Ok(IndexRegistry { defs, by_name })
    }

    /// Look up an index's dense ordinal.
    pub fn ordinal(&self, name: &IndexName) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Get a definition by ordinal.
    pub fn get(&self, ordinal: u16) -> &Arc<IndexDefinition> {
        &self.defs[ordinal as usize]
    }

    /// Iterate (ordinal, definition) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Arc<IndexDefinition>)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, def)| (i as u16, def))
    }

    /// Number of registered indices.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// True if any registered index is content-addressed.
    pub fn has_content_addressed(&self) -> bool {
        self.defs.iter().any(|d| d.content_addressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileId;

    fn meta() -> FileMeta {
        FileMeta {
            id: FileId::new(1),
            path: "src/lib.rs".to_string(),
            len: 10,
            is_valid: true,
        }
    }

    #[test]
    fn test_freeze_assigns_ordinals() {
        let registry = IndexRegistry::freeze(vec![
            IndexDefinition::new("alpha", 1, |_| Ok(InputMap::new())),
            IndexDefinition::new("beta", 1, |_| Ok(InputMap::new())),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ordinal(&IndexName::from("alpha")), Some(0));
        assert_eq!(registry.ordinal(&IndexName::from("beta")), Some(1));
        assert_eq!(registry.ordinal(&IndexName::from("gamma")), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = IndexRegistry::freeze(vec![
            IndexDefinition::new("alpha", 1, |_| Ok(InputMap::new())),
            IndexDefinition::new("alpha", 2, |_| Ok(InputMap::new())),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_typed_index_externalizes() {
        let def = typed_index(
            "words",
            1,
            StringExternalizer,
            StringExternalizer,
            |input: &IndexInput<'_>| {
                let mut map = HashMap::new();
                for word in std::str::from_utf8(input.content).unwrap_or("").split_whitespace() {
                    map.insert(word.to_string(), input.file.path.clone());
                }
                Ok(map)
            },
        );

        let file = meta();
        let input = IndexInput {
            file: &file,
            content: b"hello world",
        };
        let map = (def.indexer)(&input).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(&b"hello".to_vec()),
            Some(&b"src/lib.rs".to_vec())
        );
    }

    #[test]
    fn test_u32_externalizer_roundtrip() {
        let ext = U32Externalizer;
        let bytes = KeyExternalizer::<u32>::save(&ext, &0xdead_beef);
        assert_eq!(bytes.len(), 4);
        let back = KeyExternalizer::<u32>::read(&ext, &bytes).unwrap();
        assert_eq!(back, 0xdead_beef);
        assert!(KeyExternalizer::<u32>::read(&ext, &[1, 2]).is_err());
    }
}
