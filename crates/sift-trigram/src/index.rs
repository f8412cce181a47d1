//! The trigram index definition.
//!
//! Keyed by trigram code with a no-value payload: the presence of a file
//! id under a code is the fact of interest. Binary files contribute no
//! trigrams.

use crate::trigram::{is_binary, trigrams_of};
use sift_core::{typed_index, IndexDefinition, IndexInput, U32Externalizer, UnitExternalizer};
use std::collections::HashMap;

/// Schema version of the trigram decomposition. Bump when the window
/// shape or packing changes.
pub const TRIGRAM_SCHEMA_VERSION: u32 = 1;

/// Build the trigram index definition under `name`.
///
/// The index is content-addressed: generated files with identical bodies
/// share one cached decomposition.
pub fn trigram_index(name: &str) -> IndexDefinition {
    typed_index(
        name,
        TRIGRAM_SCHEMA_VERSION,
        U32Externalizer,
        UnitExternalizer,
        |input: &IndexInput<'_>| {
            let mut map: HashMap<u32, ()> = HashMap::new();
            if is_binary(input.content) {
                return Ok(map);
            }
            let text = String::from_utf8_lossy(input.content);
            for code in trigrams_of(&text) {
                map.insert(code, ());
            }
            Ok(map)
        },
    )
    .content_addressed()
}

/// Encode a trigram code the way the index stores it.
pub fn key_of(code: u32) -> Vec<u8> {
    code.to_be_bytes().to_vec()
}
