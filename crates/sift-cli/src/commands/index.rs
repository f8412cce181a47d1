//! Index command - scan the workspace and bring every index up to date.

use crate::app::App;
use sift_core::{Config, Scope};
use std::path::Path;
use std::time::Instant;

/// Run the index command.
pub fn run(config: Config, workspace: &Path, force: bool) -> anyhow::Result<()> {
    let app = App::new(config, workspace)?;
    let started = Instant::now();

    let summary = app.corpus.scan(&app.engine)?;
    println!(
        "Scanned workspace: {} added, {} changed, {} removed, {} unchanged",
        summary.added, summary.changed, summary.removed, summary.unchanged
    );

    for name in app.engine.index_names() {
        if force {
            app.engine.schedule_rebuild(&name)?;
        }
        app.engine.ensure_up_to_date(&name, &Scope::Everything)?;
        let status = app.engine.status(&name)?;
        println!("  {} -> {} keys", status.name, status.key_count);
    }

    println!("Done in {:.2?}", started.elapsed());
    app.shutdown()
}
