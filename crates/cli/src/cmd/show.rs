//! Show a raw object

use anyhow::Result;
use owo_colors::OwoColorize;
use std::io::Write;
use vellum_core::Object;
use vellum_store::Store;

pub fn run(store: &Store, id: &str) -> Result<()> {
    let id = store.resolve_id(id)?;
    let object = store.object(id)?;

    match object.as_ref() {
        Object::Blob(bytes) => {
            std::io::stdout().write_all(bytes)?;
        }
        Object::Tree(tree) => {
            for entry in tree.entries() {
                println!(
                    "{:o} {} {}",
                    entry.mode.mode_bits(),
                    entry.id.to_hex().yellow(),
                    entry.name
                );
            }
        }
        Object::Commit(commit) => {
            println!("{} {}", "commit".bold(), id.to_hex().yellow());
            println!("tree      {}", commit.tree.to_hex());
            for parent in &commit.parents {
                println!("parent    {}", parent.to_hex());
            }
            println!("author    {}", commit.author);
            println!("committer {}", commit.committer);
            println!();
            print!("{}", commit.message);
        }
        Object::Tag(tag) => {
            println!("{} {}", "tag".bold(), tag.name);
            println!("object {} ({})", tag.object.to_hex().yellow(), tag.kind);
            println!("tagger {}", tag.tagger);
            println!();
            print!("{}", tag.message);
        }
    }
    Ok(())
}
