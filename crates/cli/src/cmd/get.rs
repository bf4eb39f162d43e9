//! Print the value stored at a path

use anyhow::Result;
use owo_colors::OwoColorize;
use std::io::Write;
use vellum_store::{Payload, Store};

pub fn run(store: &Store, path: &str) -> Result<()> {
    match store.get(path)? {
        Some(Payload::Doc(value)) => {
            print!("{}", serde_yaml::to_string(&value)?);
        }
        Some(Payload::Bytes(bytes)) => {
            std::io::stdout().write_all(&bytes)?;
        }
        None => {
            eprintln!("{}", format!("no value at {path}").dimmed());
        }
    }
    Ok(())
}
