use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// User preferences persisted as TOML in the platform config directory.
///
/// A corrupt or unreadable file starts the app with defaults rather than
/// failing; preferences are never load-bearing.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Preferences {
    /// Persona selected at startup.
    pub default_persona: Option<String>,
    /// Search-augmentation toggle; on when unset.
    pub enable_search: Option<bool>,
}

impl Preferences {
    pub fn load() -> Preferences {
        match Self::config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Preferences::default(),
        }
    }

    pub fn load_from_path(config_path: &PathBuf) -> Preferences {
        let contents = match fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(_) => return Preferences::default(),
        };
        match toml::from_str(&contents) {
            Ok(preferences) => preferences,
            Err(e) => {
                warn!("ignoring unparseable preferences file: {e}");
                Preferences::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path().ok_or("could not determine config directory")?;
        self.save_to_path(&path)
    }

    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    fn config_path() -> Option<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "causerie")?;
        Some(proj_dirs.config_dir().join("config.toml"))
    }

    pub fn search_enabled(&self) -> bool {
        self.enable_search.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_preferences_load_as_defaults() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("nonexistent.toml");

        let preferences = Preferences::load_from_path(&path);
        assert_eq!(preferences, Preferences::default());
        assert!(preferences.search_enabled());
    }

    #[test]
    fn preferences_round_trip() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("config.toml");

        let preferences = Preferences {
            default_persona: Some("gemini-flash".to_string()),
            enable_search: Some(false),
        };
        preferences.save_to_path(&path).expect("save");

        let loaded = Preferences::load_from_path(&path);
        assert_eq!(loaded, preferences);
        assert!(!loaded.search_enabled());
    }

    #[test]
    fn corrupt_preferences_fall_back_to_defaults() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "default_persona = [this is not toml").expect("write");

        assert_eq!(Preferences::load_from_path(&path), Preferences::default());
    }
}
