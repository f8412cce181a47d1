//! Status command - show per-index state.

use crate::app::App;
use chrono::{Local, TimeZone};
use sift_core::{Config, Corpus};
use std::path::Path;

/// Run the status command.
pub fn run(config: Config, workspace: &Path) -> anyhow::Result<()> {
    let app = App::new(config, workspace)?;

    println!("Workspace: {}", app.corpus.workspace().display());
    println!("Data dir:  {}", app.data_dir().display());
    println!("Tracked files: {}", app.corpus.all_files().len());
    println!("Pending changes: {}", app.engine.pending_changes());
    println!();

    for name in app.engine.index_names() {
        let status = app.engine.status(&name)?;
        let built = status
            .creation_stamp
            .and_then(|ms| Local.timestamp_millis_opt(ms as i64).single())
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("index '{}'", status.name);
        println!("  keys:            {}", status.key_count);
        println!("  dirty files:     {}", status.dirty_files);
        println!("  rebuild pending: {}", status.rebuild_pending);
        println!("  last built:      {built}");
    }

    app.shutdown()
}
