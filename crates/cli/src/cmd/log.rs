//! Display snapshot history

use anyhow::Result;
use owo_colors::OwoColorize;
use vellum_store::Store;

pub fn run(store: &Store, limit: usize) -> Result<()> {
    let commits = store.commits(limit)?;
    if commits.is_empty() {
        println!("{}", "No snapshots yet".dimmed());
        return Ok(());
    }

    for (id, commit) in &commits {
        let when = chrono::DateTime::from_timestamp(commit.author.time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| commit.author.time.to_string());
        println!(
            "{} {} {} {}",
            (&id.to_hex()[..8]).yellow(),
            when.dimmed(),
            commit.author.name.dimmed(),
            commit.summary()
        );
    }
    Ok(())
}
