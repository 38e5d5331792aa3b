use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::settings::schema::{Settings, SETTINGS_VERSION};

const SCHEMA_JSON: &str = include_str!("../../schema/settings-v1.json");

/// Returns the canonical settings path: `~/.subq/settings.json`.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".subq").join("settings.json"))
}

/// Loads settings from `path`. A missing file yields defaults.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        log::debug!("No settings at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut settings: Settings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;
    settings.normalize();

    Ok(settings)
}

/// Writes settings as pretty JSON via a sibling temp file and rename.
pub fn save_settings<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let write_err = |source| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;

    Ok(())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != SETTINGS_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    if let Some(root) = &settings.root_dir {
        if root.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "root_dir must not be empty".to_string(),
            });
        }
    }

    if settings.publish_provider.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "publish_provider must not be empty".to_string(),
        });
    }

    Ok(())
}
