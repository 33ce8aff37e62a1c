//! Best-effort local persistence for conversation history and per-persona
//! credential overrides.
//!
//! Two JSON files in the platform data directory. A corrupt or unreadable
//! file is treated as absent: the chat starts fresh rather than failing.
//! Saves are best-effort; callers log failures and carry on.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::warn;

use crate::core::message::ChatSession;
use crate::core::persona::KeyOverride;

const HISTORY_FILE: &str = "history.json";
const KEYS_FILE: &str = "keys.json";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub history: PathBuf,
    pub keys: PathBuf,
}

impl StoragePaths {
    pub fn resolve() -> Result<Self, Box<dyn std::error::Error>> {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "causerie")
            .ok_or("could not determine data directory")?;
        let data_dir = proj_dirs.data_dir();
        Ok(Self {
            history: data_dir.join(HISTORY_FILE),
            keys: data_dir.join(KEYS_FILE),
        })
    }

    #[cfg(test)]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            history: dir.join(HISTORY_FILE),
            keys: dir.join(KEYS_FILE),
        }
    }
}

fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!("ignoring unparseable {what} file at {}: {e}", path.display());
            T::default()
        }
    }
}

fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn load_history(path: &Path) -> Vec<ChatSession> {
    load_json_or_default(path, "history")
}

pub fn save_history(
    path: &Path,
    sessions: &[ChatSession],
) -> Result<(), Box<dyn std::error::Error>> {
    save_json(path, &sessions)
}

pub fn load_key_overrides(path: &Path) -> Vec<KeyOverride> {
    load_json_or_default(path, "key overrides")
}

pub fn save_key_overrides(
    path: &Path,
    overrides: &[KeyOverride],
) -> Result<(), Box<dyn std::error::Error>> {
    save_json(path, &overrides)
}
