//! Clear command - delete all index data for a workspace.

use crate::app::App;
use sift_core::Config;
use std::io::{self, Write};
use std::path::Path;

/// Run the clear command.
pub fn run(config: Config, workspace: &Path, yes: bool) -> anyhow::Result<()> {
    let app = App::new(config, workspace)?;
    let data_dir = app.data_dir().to_path_buf();
    app.shutdown()?;

    if !yes {
        print!("Delete all index data in {}? [y/N] ", data_dir.display());
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    if data_dir.exists() {
        std::fs::remove_dir_all(&data_dir)?;
    }
    println!("Index data deleted.");
    Ok(())
}
