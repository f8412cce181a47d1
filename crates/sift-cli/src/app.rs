//! Shared application state for CLI commands.

use crate::corpus::DirCorpus;
use anyhow::Context;
use sift_core::{
    typed_index, Config, Engine, EngineBuilder, IndexDefinition, IndexInput, StringExternalizer,
    UnitExternalizer,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the content trigram index.
pub const TRIGRAM_INDEX: &str = "trigrams";

/// Name of the file-extension index.
pub const EXT_INDEX: &str = "ext";

/// Extension index: one key per file (its lowercased extension), no
/// value. A single-entry index, so per-file updates diff one key.
fn ext_index() -> IndexDefinition {
    typed_index(
        EXT_INDEX,
        1,
        StringExternalizer,
        UnitExternalizer,
        |input: &IndexInput<'_>| {
            let mut map: HashMap<String, ()> = HashMap::new();
            if let Some((_, ext)) = input.file.path.rsplit_once('.') {
                if !ext.is_empty() && !ext.contains('/') {
                    map.insert(ext.to_lowercase(), ());
                }
            }
            Ok(map)
        },
    )
    .single_entry_diff()
}

/// Engine + corpus wired up for one workspace.
pub struct App {
    pub config: Config,
    pub corpus: Arc<DirCorpus>,
    pub engine: Arc<Engine>,
    data_dir: PathBuf,
}

impl App {
    /// Open the app for a workspace directory. Index data lives under
    /// `<workspace>/.sift` unless the config names a root.
    pub fn new(config: Config, workspace: &Path) -> anyhow::Result<Self> {
        let data_dir = match &config.general.root {
            Some(root) => root.clone(),
            None => workspace.join(".sift"),
        };

        let corpus = Arc::new(DirCorpus::open(workspace, data_dir.join("files.bin"))?);
        let engine = EngineBuilder::new(data_dir.join("index"), corpus.clone())
            .with_config(config.engine.clone())
            .register(sift_trigram::trigram_index(TRIGRAM_INDEX))
            .register(ext_index())
            .open()
            .context("failed to open index engine")?;

        Ok(App {
            config,
            corpus,
            engine,
            data_dir,
        })
    }

    /// Directory holding the engine stores and file table.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persist the file table and close the engine cleanly.
    pub fn shutdown(self) -> anyhow::Result<()> {
        self.corpus.save()?;
        self.engine.close()?;
        Ok(())
    }
}
