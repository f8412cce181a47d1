//! Directory-backed corpus for the CLI.
//!
//! Walks a workspace directory (gitignore-aware) and assigns each file a
//! stable integer id, persisted in a file table next to the engine's
//! stores. Re-scanning compares length and mtime and feeds the resulting
//! change events into the engine.

use anyhow::Context;
use ignore::WalkBuilder;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sift_core::{Corpus, Engine, FileId, FileMeta};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    path: String,
    len: u64,
    mtime_ms: u64,
    valid: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileTable {
    by_path: HashMap<String, u32>,
    files: HashMap<u32, FileEntry>,
    next_id: u32,
}

/// Result of one workspace scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    /// Files seen for the first time.
    pub added: usize,
    /// Files whose length or mtime moved.
    pub changed: usize,
    /// Previously known files no longer present.
    pub removed: usize,
    /// Files untouched since the last scan.
    pub unchanged: usize,
}

/// A workspace directory viewed as a tracked-file corpus.
pub struct DirCorpus {
    workspace: PathBuf,
    table_path: PathBuf,
    table: RwLock<FileTable>,
}

impl DirCorpus {
    /// Open the corpus for `workspace`, loading the persisted file table
    /// from `table_path` if present.
    pub fn open(workspace: impl AsRef<Path>, table_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let table_path = table_path.as_ref().to_path_buf();
        let table = match fs::read(&table_path) {
            Ok(bytes) => bincode::deserialize(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "file table unreadable; starting fresh");
                FileTable::default()
            }),
            Err(_) => FileTable::default(),
        };
        Ok(DirCorpus {
            workspace: workspace.as_ref().canonicalize().with_context(|| {
                format!("workspace not found: {}", workspace.as_ref().display())
            })?,
            table_path,
            table: RwLock::new(table),
        })
    }

    /// The workspace root this corpus tracks.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Persist the file table.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.table_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(&*self.table.read())?;
        fs::write(&self.table_path, bytes)?;
        Ok(())
    }

    /// Resolve a workspace-relative path to its file id, if tracked.
    pub fn id_of(&self, rel_path: &str) -> Option<FileId> {
        self.table.read().by_path.get(rel_path).copied().map(FileId::new)
    }

    fn rel_path(&self, abs: &Path) -> Option<String> {
        abs.strip_prefix(&self.workspace)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    /// Walk the workspace, reconcile the file table, and feed change
    /// events into `engine`.
    pub fn scan(&self, engine: &Engine) -> anyhow::Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut seen: HashMap<String, (u64, u64)> = HashMap::new();

        for entry in WalkBuilder::new(&self.workspace).hidden(true).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "walk error; entry skipped");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(rel) = self.rel_path(entry.path()) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            seen.insert(rel, (meta.len(), mtime_ms));
        }

        let mut table = self.table.write();

        // Removals first: anything tracked but not walked.
        let gone: Vec<(String, u32)> = table
            .by_path
            .iter()
            .filter(|(path, _)| !seen.contains_key(*path))
            .map(|(path, &id)| (path.clone(), id))
            .collect();
        for (path, id) in gone {
            if let Some(entry) = table.files.get_mut(&id) {
                if entry.valid {
                    entry.valid = false;
                    engine.record_file_removed(FileId::new(id));
                    summary.removed += 1;
                }
            }
            table.by_path.remove(&path);
        }

        for (path, (len, mtime_ms)) in seen {
            match table.by_path.get(&path).copied() {
                Some(id) => {
                    let entry = table.files.get_mut(&id).expect("entry for mapped id");
                    if entry.len != len || entry.mtime_ms != mtime_ms || !entry.valid {
                        entry.len = len;
                        entry.mtime_ms = mtime_ms;
                        entry.valid = true;
                        engine.record_file_event(FileId::new(id), true);
                        summary.changed += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                None => {
                    table.next_id += 1;
                    let id = table.next_id;
                    table.by_path.insert(path.clone(), id);
                    table.files.insert(
                        id,
                        FileEntry {
                            path,
                            len,
                            mtime_ms,
                            valid: true,
                        },
                    );
                    engine.record_file_event(FileId::new(id), false);
                    summary.added += 1;
                }
            }
        }

        info!(
            added = summary.added,
            changed = summary.changed,
            removed = summary.removed,
            unchanged = summary.unchanged,
            "workspace scanned"
        );
        Ok(summary)
    }

    /// Record a single path-level event from a filesystem watcher.
    pub fn note_path_event(&self, engine: &Engine, abs: &Path, removed: bool) {
        let Some(rel) = self.rel_path(abs) else {
            return;
        };
        let mut table = self.table.write();
        match table.by_path.get(&rel).copied() {
            Some(id) => {
                if removed {
                    if let Some(entry) = table.files.get_mut(&id) {
                        entry.valid = false;
                    }
                    table.by_path.remove(&rel);
                    engine.record_file_removed(FileId::new(id));
                } else {
                    if let Ok(meta) = fs::metadata(abs) {
                        if let Some(entry) = table.files.get_mut(&id) {
                            entry.len = meta.len();
                            entry.mtime_ms = meta
                                .modified()
                                .ok()
                                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                                .map(|d| d.as_millis() as u64)
                                .unwrap_or(entry.mtime_ms);
                            entry.valid = true;
                        }
                    }
                    engine.record_file_event(FileId::new(id), true);
                }
            }
            None if !removed => {
                let Ok(meta) = fs::metadata(abs) else {
                    return;
                };
                table.next_id += 1;
                let id = table.next_id;
                table.by_path.insert(rel.clone(), id);
                table.files.insert(
                    id,
                    FileEntry {
                        path: rel,
                        len: meta.len(),
                        mtime_ms: 0,
                        valid: true,
                    },
                );
                engine.record_file_event(FileId::new(id), false);
            }
            None => {}
        }
    }

    /// Workspace-relative path of a tracked file.
    pub fn path_of(&self, id: FileId) -> Option<String> {
        self.table
            .read()
            .files
            .get(&id.as_u32())
            .map(|entry| entry.path.clone())
    }
}

impl Corpus for DirCorpus {
    fn meta(&self, id: FileId) -> Option<FileMeta> {
        self.table.read().files.get(&id.as_u32()).map(|entry| FileMeta {
            id,
            path: entry.path.clone(),
            len: entry.len,
            is_valid: entry.valid,
        })
    }

    fn content(&self, id: FileId) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(entry) = self.table.read().files.get(&id.as_u32()).cloned() else {
            return Ok(None);
        };
        if !entry.valid {
            return Ok(None);
        }
        match fs::read(self.workspace.join(&entry.path)) {
            Ok(bytes) => Ok(Some(bytes)),
            // A file that vanished between scan and read indexes as
            // having no content; the next scan records the removal.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn all_files(&self) -> Vec<FileId> {
        self.table
            .read()
            .files
            .iter()
            .filter(|(_, entry)| entry.valid)
            .map(|(&id, _)| FileId::new(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{EngineBuilder, Scope};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Arc<DirCorpus>, Arc<Engine>) {
        let workspace = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::write(workspace.path().join("a.txt"), "hello world").unwrap();
        fs::write(workspace.path().join("b.txt"), "other text").unwrap();

        let corpus =
            Arc::new(DirCorpus::open(workspace.path(), data.path().join("files.bin")).unwrap());
        let engine = EngineBuilder::new(data.path().join("index"), corpus.clone())
            .register(sift_trigram::trigram_index("trigrams"))
            .open()
            .unwrap();
        (workspace, data, corpus, engine)
    }

    #[test]
    fn test_scan_assigns_stable_ids() {
        let (_workspace, _data, corpus, engine) = setup();
        let summary = corpus.scan(&engine).unwrap();
        assert_eq!(summary.added, 2);

        let id = corpus.id_of("a.txt").unwrap();
        let again = corpus.scan(&engine).unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.unchanged, 2);
        assert_eq!(corpus.id_of("a.txt"), Some(id));
        engine.close().unwrap();
    }

    #[test]
    fn test_scan_detects_removal() {
        let (workspace, _data, corpus, engine) = setup();
        corpus.scan(&engine).unwrap();
        engine
            .ensure_up_to_date(&"trigrams".into(), &Scope::Everything)
            .unwrap();

        fs::remove_file(workspace.path().join("b.txt")).unwrap();
        let summary = corpus.scan(&engine).unwrap();
        assert_eq!(summary.removed, 1);
        assert!(corpus.id_of("b.txt").is_none());
        engine.close().unwrap();
    }

    #[test]
    fn test_table_persists() {
        let (_workspace, data, corpus, engine) = setup();
        corpus.scan(&engine).unwrap();
        let id = corpus.id_of("a.txt").unwrap();
        corpus.save().unwrap();
        engine.close().unwrap();

        let reopened =
            DirCorpus::open(corpus.workspace(), data.path().join("files.bin")).unwrap();
        assert_eq!(reopened.id_of("a.txt"), Some(id));
    }
}
