use std::path::{Path, PathBuf};

use thiserror::Error;

use super::app_dirs::{get_cache_dir, SETTINGS_DIR};
use crate::kernel::services::ports::settings::Settings;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot determine settings directory")]
    NoSettingsDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn get_settings_path() -> Option<PathBuf> {
    get_cache_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Settings resolved at startup. `fallback` carries the reason defaults were
/// used; callers log it once tracing is installed.
#[derive(Debug)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub fallback: Option<SettingsError>,
}

impl LoadedSettings {
    fn from_result(result: Result<Settings, SettingsError>) -> Self {
        match result {
            Ok(settings) => Self {
                settings,
                fallback: None,
            },
            Err(e) => Self {
                settings: Settings::default(),
                fallback: Some(e),
            },
        }
    }
}

pub fn load_settings_from(path: &Path) -> Result<Settings, SettingsError> {
    let data = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a default file at `path` on first run, then loads it.
pub fn load_settings_at(path: &Path) -> LoadedSettings {
    LoadedSettings::from_result(
        write_default_if_missing(path).and_then(|()| load_settings_from(path)),
    )
}

/// Loads `<cache>/.idex/settings.json`, falling back to defaults.
pub fn load_settings() -> LoadedSettings {
    match get_settings_path() {
        Some(path) => load_settings_at(&path),
        None => LoadedSettings::from_result(Err(SettingsError::NoSettingsDir)),
    }
}

fn write_default_if_missing(path: &Path) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    if !path.exists() {
        let content =
            serde_json::to_string_pretty(&Settings::default()).unwrap_or_else(|_| "{}".to_string());
        std::fs::write(path, content).map_err(io_err)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/adapters/settings.rs"]
mod tests;
