//! Commit identity resolution.
//!
//! Identity comes from `~/.config/vellum/config.toml`, overridable via
//! `VELLUM_AUTHOR_NAME` / `VELLUM_AUTHOR_EMAIL`. When neither exists a
//! hostname-qualified fallback keeps commits writable out of the box.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Who authored a commit: name and email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    user: UserSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSection {
    name: Option<String>,
    email: Option<String>,
}

/// Location of the user-level configuration file.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vellum").join("config.toml"))
}

fn load_config() -> UserSection {
    let Some(path) = config_path() else {
        return UserSection::default();
    };
    let Ok(raw) = fs::read_to_string(&path) else {
        return UserSection::default();
    };
    match toml::from_str::<ConfigFile>(&raw) {
        Ok(config) => config.user,
        Err(e) => {
            tracing::warn!(config = %path.display(), "ignoring unparseable config: {e}");
            UserSection::default()
        }
    }
}

impl Identity {
    /// Resolve the committing identity.
    ///
    /// Resolution order: environment overrides, the config file, then a
    /// `user@hostname` fallback. Never fails; a store must always be able
    /// to commit.
    pub fn resolve() -> Self {
        let config = load_config();

        let name = std::env::var("VELLUM_AUTHOR_NAME")
            .ok()
            .filter(|v| !v.is_empty())
            .or(config.name)
            .or_else(|| std::env::var("USER").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "vellum".to_string());

        let email = std::env::var("VELLUM_AUTHOR_EMAIL")
            .ok()
            .filter(|v| !v.is_empty())
            .or(config.email)
            .unwrap_or_else(|| {
                let host = std::env::var("HOSTNAME")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "localhost".to_string());
                format!("{name}@{host}")
            });

        Self { name, email }
    }
}
