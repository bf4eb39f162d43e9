//! List every stored path

use anyhow::Result;
use owo_colors::OwoColorize;
use vellum_store::Store;

pub fn run(store: &Store) -> Result<()> {
    let paths = store.paths()?;
    if paths.is_empty() {
        println!("{}", "empty store".dimmed());
        return Ok(());
    }
    for path in paths {
        println!("{path}");
    }
    Ok(())
}
