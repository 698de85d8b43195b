// THEORY:
// The learned background color is the only state that outlives the process.
// It is read once at startup and written whenever calibration passes.
//
// The store is an injected dependency behind `SettingsStore` rather than a
// global, so the pipeline can be driven with an in-memory store in tests and a
// JSON file in production. The file is replaced atomically: the new contents
// are written beside it and renamed over the old file.

use crate::core_modules::color_classifier::ColorLabel;
use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "color_sorter";
const SETTINGS_FILE: &str = "settings.json";

pub trait SettingsStore: Send {
    fn load_background(&self) -> Result<Option<ColorLabel>, SettingsError>;
    fn store_background(&mut self, background: Option<ColorLabel>) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PersistedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    background_color: Option<ColorLabel>,
}

/// Settings kept as a small JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/color_sorter/settings.json`.
    pub fn default_location() -> Result<Self, SettingsError> {
        let dir = dirs::config_dir().ok_or(SettingsError::NoSettingsDir)?;
        Ok(Self::new(dir.join(APP_DIR).join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load_background(&self) -> Result<Option<ColorLabel>, SettingsError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file yet");
                return Ok(None);
            }
            Err(err) => return Err(self.io_error(err)),
        };
        let settings: PersistedSettings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Format {
                path: self.path.clone(),
                source,
            })?;
        Ok(settings.background_color)
    }

    fn store_background(&mut self, background: Option<ColorLabel>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let settings = PersistedSettings {
            background_color: background,
        };
        let contents = serde_json::to_string_pretty(&settings).map_err(|source| SettingsError::Format {
            path: self.path.clone(),
            source,
        })?;

        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, contents).map_err(|err| self.io_error(err))?;
        std::fs::rename(&staging, &self.path).map_err(|err| self.io_error(err))?;
        debug!(path = %self.path.display(), ?background, "settings saved");
        Ok(())
    }
}

/// Non-persistent store, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    background: Option<ColorLabel>,
}

impl MemorySettingsStore {
    pub fn new(background: Option<ColorLabel>) -> Self {
        Self { background }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_background(&self) -> Result<Option<ColorLabel>, SettingsError> {
        Ok(self.background)
    }

    fn store_background(&mut self, background: Option<ColorLabel>) -> Result<(), SettingsError> {
        self.background = background;
        Ok(())
    }
}
