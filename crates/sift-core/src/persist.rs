//! Shared on-disk file format for the engine's persistent stores.
//!
//! Every store file (storage backend, forward index, stamps, snapshot
//! maps, version records) uses the same envelope:
//!
//! ```text
//! [Header: 12 bytes]
//!   - Magic: 4 bytes, store-specific
//!   - Format version: u32
//!   - Flags: u32 (bit 0 = lz4 compressed body)
//!
//! [Body: variable]
//!   - bincode payload, lz4 block-compressed with a size prefix
//!
//! [Footer: 8 bytes]
//!   - CRC32 of the body bytes as written: u32
//!   - Magic reversed: 4 bytes
//! ```
//!
//! Writes go to a temp file and are renamed into place, so a crash can
//! never leave a half-written store; a torn rename leaves the old file.
//! Any validation failure surfaces as `StorageCorrupted`, which the
//! orchestrator turns into a rebuild of the affected index.

use crate::error::{Result, SiftError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Envelope format version, independent of the engine version.
const FORMAT_VERSION: u32 = 1;

const FLAG_COMPRESSED: u32 = 1;

/// Size of the compressed body above which compression actually runs.
const COMPRESSION_THRESHOLD: usize = 512;

fn reversed(magic: &[u8; 4]) -> [u8; 4] {
    let mut out = *magic;
    out.reverse();
    out
}

/// Serialize `value` and atomically write it to `path`.
pub(crate) fn save<T: Serialize>(path: &Path, magic: &[u8; 4], value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let raw = bincode::serialize(value)?;
    let (body, flags) = if raw.len() >= COMPRESSION_THRESHOLD {
        (lz4_flex::compress_prepend_size(&raw), FLAG_COMPRESSED)
    } else {
        (raw, 0)
    };

    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(magic)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&flags.to_le_bytes())?;
        writer.write_all(&body)?;
        writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        writer.write_all(&reversed(magic))?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;

    debug!(path = %path.display(), bytes = body.len(), "store saved");
    Ok(())
}

/// Load and validate a store file. Returns `Ok(None)` if the file does
/// not exist.
pub(crate) fn load<T: DeserializeOwned>(path: &Path, magic: &[u8; 4]) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    let file_len = file.metadata()?.len() as usize;
    if file_len < 20 {
        return Err(SiftError::corrupted(format!(
            "{}: truncated ({} bytes)",
            path.display(),
            file_len
        )));
    }

    let mut reader = BufReader::new(file);

    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    if &header[0..4] != magic {
        return Err(SiftError::corrupted(format!(
            "{}: invalid magic bytes",
            path.display()
        )));
    }
    let format = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if format > FORMAT_VERSION {
        return Err(SiftError::corrupted(format!(
            "{}: format {} is newer than supported {}",
            path.display(),
            format,
            FORMAT_VERSION
        )));
    }
    let flags = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

    let mut body = vec![0u8; file_len - 12 - 8];
    reader.read_exact(&mut body)?;

    let mut footer = [0u8; 8];
    reader.read_exact(&mut footer)?;
    let stored_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    if footer[4..8] != reversed(magic) {
        return Err(SiftError::corrupted(format!(
            "{}: invalid footer magic",
            path.display()
        )));
    }
    let computed_crc = crc32fast::hash(&body);
    if stored_crc != computed_crc {
        return Err(SiftError::corrupted(format!(
            "{}: checksum mismatch (stored {:08x}, computed {:08x})",
            path.display(),
            stored_crc,
            computed_crc
        )));
    }

    let raw = if flags & FLAG_COMPRESSED != 0 {
        lz4_flex::decompress_size_prepended(&body).map_err(|e| {
            SiftError::corrupted(format!("{}: decompression failed: {}", path.display(), e))
        })?
    } else {
        body
    };

    let value = bincode::deserialize(&raw)
        .map_err(|e| SiftError::corrupted(format!("{}: decode failed: {}", path.display(), e)))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MAGIC: &[u8; 4] = b"STST";

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        let mut data: HashMap<u32, String> = HashMap::new();
        data.insert(1, "one".to_string());
        data.insert(2, "two".to_string());

        save(&path, MAGIC, &data).unwrap();
        let loaded: HashMap<u32, String> = load(&path, MAGIC).unwrap().unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Vec<u8>> = load(&dir.path().join("missing.bin"), MAGIC).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");
        fs::write(&path, b"definitely not a valid store file").unwrap();

        let result: Result<Option<Vec<u8>>> = load(&path, MAGIC);
        assert!(matches!(result, Err(SiftError::StorageCorrupted { .. })));
    }

    #[test]
    fn test_corrupted_body_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");
        let data: Vec<String> = vec!["x".repeat(2048)];
        save(&path, MAGIC, &data).unwrap();

        // Flip one byte inside the body.
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let result: Result<Option<Vec<String>>> = load(&path, MAGIC);
        assert!(matches!(result, Err(SiftError::StorageCorrupted { .. })));
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");
        save(&path, MAGIC, &vec![1u32, 2, 3]).unwrap();

        let result: Result<Option<Vec<u32>>> = load(&path, b"OTHR");
        assert!(matches!(result, Err(SiftError::StorageCorrupted { .. })));
    }
}
