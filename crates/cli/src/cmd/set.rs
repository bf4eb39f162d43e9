//! Set a value at a path and commit

use anyhow::Result;
use owo_colors::OwoColorize;
use vellum_store::{Payload, Store};

pub fn run(store: &mut Store, path: &str, value: &str, message: &str) -> Result<()> {
    let payload = if path.ends_with(".yml") {
        Payload::Doc(serde_yaml::from_str(value)?)
    } else {
        Payload::Bytes(value.as_bytes().to_vec())
    };

    store.transaction(message, |store| store.set(path, payload))?;

    let head = store.head_id().map(|id| id.to_hex()).unwrap_or_default();
    let short = head.get(..8).unwrap_or("unknown");
    println!("{} {} {}", "committed".green(), short.yellow(), path);
    Ok(())
}
