//! Whole-record read/write access to the settings.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::loader::{load_settings, save_settings};
use super::schema::Settings;
use crate::error::ConfigError;

/// Source of the settings snapshot. Readers get a fresh copy on every
/// `load`; writers replace the whole record.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
    fn save(&self, settings: &Settings) -> Result<(), ConfigError>;
}

/// Settings persisted as a JSON file.
pub struct JsonSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        load_settings(&self.path)
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().map_err(|_| ConfigError::LockPoisoned)?;
        save_settings(&self.path, settings)?;
        log::debug!("Settings written to {}", self.path.display());
        Ok(())
    }
}

/// Settings held in memory.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: Mutex<Settings>,
}

impl MemorySettingsStore {
    pub fn new(mut settings: Settings) -> Self {
        settings.normalize();
        Self {
            inner: Mutex::new(settings),
        }
    }

    /// Current record, for assertions.
    pub fn snapshot(&self) -> Result<Settings, ConfigError> {
        self.load()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        self.inner
            .lock()
            .map(|s| s.clone())
            .map_err(|_| ConfigError::LockPoisoned)
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let mut inner = self.inner.lock().map_err(|_| ConfigError::LockPoisoned)?;
        *inner = settings.clone();
        Ok(())
    }
}
