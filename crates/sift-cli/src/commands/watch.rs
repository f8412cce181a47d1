//! Watch command - monitor the workspace and keep indices fresh.

use crate::app::App;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use sift_core::{Config, Scope};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

/// How long to keep draining after the first event before requesting an
/// update pass, so editor save bursts coalesce into one pass.
const SETTLE_WINDOW: Duration = Duration::from_millis(250);

/// Run the watch command.
pub fn run(config: Config, workspace: &Path) -> anyhow::Result<()> {
    let app = App::new(config, workspace)?;

    // Catch up on anything that changed while not watching.
    let summary = app.corpus.scan(&app.engine)?;
    for name in app.engine.index_names() {
        app.engine.ensure_up_to_date(&name, &Scope::Everything)?;
    }
    println!(
        "Initial pass complete ({} added, {} changed, {} removed).",
        summary.added, summary.changed, summary.removed
    );

    let (tx, rx) = crossbeam_channel::unbounded::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |result| {
        let _ = tx.send(result);
    })?;
    watcher.watch(app.corpus.workspace(), RecursiveMode::Recursive)?;

    println!("Watching {} for changes...", app.corpus.workspace().display());
    println!("Press Ctrl+C to stop.");

    let data_dir = app.data_dir().to_path_buf();
    loop {
        let first = match rx.recv() {
            Ok(event) => event,
            Err(_) => break,
        };

        let mut batch = vec![first];
        // Let the burst settle, then handle everything at once.
        while let Ok(event) = rx.recv_timeout(SETTLE_WINDOW) {
            batch.push(event);
        }

        let mut touched = false;
        for result in batch {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "watch error");
                    continue;
                }
            };
            let removed = matches!(event.kind, EventKind::Remove(_));
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }
            for path in &event.paths {
                // The engine writes its own stores under the data dir;
                // feeding those back would loop forever.
                if path.starts_with(&data_dir) {
                    continue;
                }
                debug!(path = %path.display(), removed, "file event");
                app.corpus.note_path_event(&app.engine, path, removed);
                touched = true;
            }
        }

        if touched {
            info!(pending = app.engine.pending_changes(), "changes queued");
            for name in app.engine.index_names() {
                app.engine.request_update(&name);
            }
            app.corpus.save()?;
        }
    }

    app.shutdown()
}
