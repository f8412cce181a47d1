//! Query command - substring search with optional extension filters.

use crate::app::{App, EXT_INDEX, TRIGRAM_INDEX};
use crate::OutputFormat;
use sift_core::{Config, Scope, SiftError};
use sift_trigram::{files_with_any_key, intersect_filters, FilterSet, SubstringSearcher};
use std::path::Path;

/// Run the query command.
pub fn run(
    config: Config,
    workspace: &Path,
    needle: &str,
    extensions: Vec<String>,
    limit: usize,
    sync: bool,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let app = App::new(config, workspace)?;

    if sync {
        app.corpus.scan(&app.engine)?;
    }
    for name in app.engine.index_names() {
        app.engine.ensure_up_to_date(&name, &Scope::Everything)?;
    }

    // Extension clause against its own index; absent means unrestricted.
    let ext_set = if extensions.is_empty() {
        None
    } else {
        let keys: Vec<Vec<u8>> = extensions
            .iter()
            .map(|ext| ext.to_lowercase().into_bytes())
            .collect();
        Some(files_with_any_key(
            &app.engine,
            &EXT_INDEX.into(),
            &keys,
            &Scope::Everything,
        )?)
    };

    let searcher = SubstringSearcher::new(
        app.engine.clone(),
        app.corpus.clone(),
        TRIGRAM_INDEX,
    );
    let text_hits = match searcher.files_containing(needle, &Scope::Everything) {
        Ok(hits) => hits,
        Err(SiftError::RebuildPending { index }) => {
            eprintln!("index '{index}' is rebuilding; results unknown, try again");
            return app.shutdown();
        }
        Err(e) => return Err(e.into()),
    };

    let combined = intersect_filters([
        Some(FilterSet::Files(text_hits.into_iter().collect())),
        ext_set,
    ]);
    let files = combined.into_files().unwrap_or_default();

    let mut shown = 0usize;
    let mut lines = Vec::new();
    for file in files {
        if shown >= limit {
            break;
        }
        if let Some(path) = app.corpus.path_of(file) {
            lines.push(path);
            shown += 1;
        }
    }

    match output {
        OutputFormat::Text => {
            for line in &lines {
                println!("{line}");
            }
            eprintln!("{shown} match(es)");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
    }

    app.shutdown()
}
