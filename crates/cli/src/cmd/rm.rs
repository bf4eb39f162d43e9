//! Delete the value at a path and commit

use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use vellum_store::Store;

pub fn run(store: &mut Store, path: &str, message: &str) -> Result<()> {
    store.transaction(message, |store| {
        if !store.delete(path)? {
            bail!("no value at {path}");
        }
        Ok(())
    })?;
    println!("{} {}", "removed".green(), path);
    Ok(())
}
