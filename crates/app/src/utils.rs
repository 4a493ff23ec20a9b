//! Settings and storage locations for the quickask app.

use anyhow::{Context, Result};
use shared::settings::AppSettings;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "quickask";

/// Expand a path string that may start with ~ to the full home directory path
pub fn expand_user_path(path_str: &str) -> PathBuf {
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path_str)
}

/// Get the config file path
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push(APP_DIR);
        p.push("settings.json");
        p
    })
}

/// Where templates and install metadata are kept.
pub fn storage_path(settings: &AppSettings) -> Option<PathBuf> {
    if let Some(custom) = settings.templates_path.as_deref() {
        return Some(expand_user_path(custom));
    }
    dirs::config_dir().map(|mut p| {
        p.push(APP_DIR);
        p.push("storage.json");
        p
    })
}

/// Load settings from disk or return defaults. The flag tells whether a
/// settings file was found.
pub fn load_settings_or_default() -> (AppSettings, bool) {
    match config_path() {
        Some(path) => load_settings_from(&path),
        None => (AppSettings::default(), false),
    }
}

pub fn load_settings_from(path: &Path) -> (AppSettings, bool) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return (AppSettings::default(), false);
    };
    match serde_json::from_str::<AppSettings>(&contents) {
        Ok(settings) => (settings, true),
        Err(e) => {
            tracing::warn!("ignoring unreadable settings at {}: {}", path.display(), e);
            (AppSettings::default(), false)
        }
    }
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    let path = config_path().context("No config directory on this system")?;
    save_settings_to(settings, &path)
}

pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = AppSettings::default();
        settings.greeting_prompt = "Say hi".into();
        settings.popup.width = 320.0;
        save_settings_to(&settings, &path).unwrap();

        let (loaded, found) = load_settings_from(&path);
        assert!(found);
        assert_eq!(loaded.greeting_prompt, "Say hi");
        assert_eq!(loaded.popup.width, 320.0);
    }

    #[test]
    fn test_missing_or_broken_settings_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        assert!(!load_settings_from(&path).1);

        std::fs::write(&path, "{ not json").unwrap();
        let (settings, found) = load_settings_from(&path);
        assert!(!found);
        assert_eq!(settings.selection.chars_before, 1000);
    }

    #[test]
    fn test_storage_path_override() {
        let mut settings = AppSettings::default();
        settings.templates_path = Some("/tmp/qa/templates.json".into());
        assert_eq!(
            storage_path(&settings),
            Some(PathBuf::from("/tmp/qa/templates.json"))
        );
    }
}
