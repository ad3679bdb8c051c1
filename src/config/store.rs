//! Settings persistence
//!
//! Settings live in `settings.json` under the platform data directory
//! (`~/.local/share/stagebot/settings.json` on Linux). A `settings.toml`
//! next to it is read when no JSON file exists.

use std::path::{Path, PathBuf};

use super::Settings;
use crate::Result;

/// Loads and saves [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Create a store backed by a specific JSON file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the default location
    ///
    /// `STAGEBOT_SETTINGS` overrides the path.
    #[must_use]
    pub fn open_default() -> Self {
        Self::new(default_settings_path())
    }

    /// Path of the JSON settings file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults
    ///
    /// Missing or unreadable files are logged and never fatal.
    #[must_use]
    pub fn load(&self) -> Settings {
        if self.path.exists() {
            match std::fs::read_to_string(&self.path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(settings) => {
                        tracing::info!(path = %self.path.display(), "loaded settings");
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "failed to parse settings, using defaults"
                        );
                        return Settings::default();
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to read settings"
                    );
                    return Settings::default();
                }
            }
        }

        let toml_path = self.path.with_extension("toml");
        if toml_path.exists() {
            match std::fs::read_to_string(&toml_path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        tracing::info!(path = %toml_path.display(), "loaded settings from TOML");
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %toml_path.display(),
                            error = %e,
                            "failed to parse TOML settings, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %toml_path.display(),
                        error = %e,
                        "failed to read TOML settings"
                    );
                }
            }
        }

        tracing::debug!("no saved settings found, using defaults");
        Settings::default()
    }

    /// Persist settings as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;

        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Merge a JSON document over the saved settings and persist the result
    ///
    /// # Errors
    ///
    /// Returns error if the document is invalid or cannot be saved
    pub fn import(&self, json: &str) -> Result<Settings> {
        let mut settings = self.load();
        settings.update_from_json(json)?;
        self.save(&settings)?;
        Ok(settings)
    }

    /// Restore defaults and persist them
    ///
    /// # Errors
    ///
    /// Returns error if the defaults cannot be saved
    pub fn reset(&self) -> Result<Settings> {
        let settings = Settings::default();
        self.save(&settings)?;
        tracing::info!("settings reset to defaults");
        Ok(settings)
    }
}

/// Resolve the settings path
fn default_settings_path() -> PathBuf {
    if let Ok(path) = std::env::var("STAGEBOT_SETTINGS") {
        return PathBuf::from(path);
    }

    directories::ProjectDirs::from("dev", "stagebot", "stagebot").map_or_else(
        || PathBuf::from("settings.json"),
        |d| d.data_dir().join("settings.json"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = store.load();
        assert_eq!(settings.model, super::super::DEFAULT_MODEL);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));

        let settings = Settings {
            greeting_text: "Добро пожаловать".to_string(),
            waiting_interval: 5_000,
            ..Settings::default()
        };
        store.save(&settings).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.greeting_text, "Добро пожаловать");
        assert_eq!(loaded.waiting_interval, 5_000);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let settings = SettingsStore::new(&path).load();
        assert_eq!(settings.language, "ru-RU");
    }

    #[test]
    fn test_toml_fallback() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.toml"),
            "apiKey = \"sk-toml\"\nlanguage = \"en-US\"\n",
        )
        .unwrap();

        let settings = SettingsStore::new(dir.path().join("settings.json")).load();
        assert_eq!(settings.api_key, "sk-toml");
        assert_eq!(settings.language, "en-US");
    }

    #[test]
    fn test_import_and_reset() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));

        let imported = store.import(r#"{"model": "gpt-4o-mini"}"#).unwrap();
        assert_eq!(imported.model, "gpt-4o-mini");
        assert_eq!(store.load().model, "gpt-4o-mini");

        assert!(store.import("[]").is_err());
        assert_eq!(store.load().model, "gpt-4o-mini");

        let reset = store.reset().unwrap();
        assert_eq!(reset.model, super::super::DEFAULT_MODEL);
        assert_eq!(store.load().model, super::super::DEFAULT_MODEL);
    }
}
