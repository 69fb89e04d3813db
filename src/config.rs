//! Configuration management for the data models
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (datamodels.toml)
//! - Environment variables (ROMAN_DATAMODELS__*)
//!
//! ## Example config file (datamodels.toml):
//! ```toml
//! [io]
//! validate_on_read = true
//! verify_checksums = true
//!
//! [validation]
//! validate_on_assignment = true
//!
//! [schemas]
//! extra_dir = "./schemas"
//! ```
//!
//! The `io` and `validation` flags are process-wide switches. Loading a
//! config does not change them; call [`DataModelConfig::apply`].

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

static VALIDATE_ON_READ: AtomicBool = AtomicBool::new(true);
static VALIDATE_ON_ASSIGNMENT: AtomicBool = AtomicBool::new(true);
static VERIFY_CHECKSUMS: AtomicBool = AtomicBool::new(true);

/// Whether `open` runs full validation after decoding (default: on)
pub fn validate_on_read() -> bool {
    VALIDATE_ON_READ.load(Ordering::Relaxed)
}

pub fn set_validate_on_read(enabled: bool) {
    VALIDATE_ON_READ.store(enabled, Ordering::Relaxed);
}

/// Whether `Node::set` checks values against their fragment (default: on)
pub fn validate_on_assignment() -> bool {
    VALIDATE_ON_ASSIGNMENT.load(Ordering::Relaxed)
}

pub fn set_validate_on_assignment(enabled: bool) {
    VALIDATE_ON_ASSIGNMENT.store(enabled, Ordering::Relaxed);
}

/// Whether block checksums are verified on read (default: on)
pub fn verify_checksums() -> bool {
    VERIFY_CHECKSUMS.load(Ordering::Relaxed)
}

pub fn set_verify_checksums(enabled: bool) {
    VERIFY_CHECKSUMS.store(enabled, Ordering::Relaxed);
}

/// Main configuration for the data models
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataModelConfig {
    /// File I/O settings
    #[serde(default)]
    pub io: IoConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Schema source settings
    #[serde(default)]
    pub schemas: SchemaSourceConfig,
}

/// File I/O configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Run full validation when opening a file
    #[serde(default = "default_true")]
    pub validate_on_read: bool,

    /// Check block checksums when opening a file
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Check each assigned value against its schema fragment
    #[serde(default = "default_true")]
    pub validate_on_assignment: bool,
}

/// Schema source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaSourceConfig {
    /// Directory of additional schema documents
    #[serde(default)]
    pub extra_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            validate_on_read: true,
            verify_checksums: true,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validate_on_assignment: true,
        }
    }
}

impl DataModelConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "datamodels.toml",
            ".datamodels.toml",
            "config/datamodels.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("edu", "stsci", "roman-datamodels") {
            let xdg_config = config_dir.config_dir().join("datamodels.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ROMAN_DATAMODELS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Push the flags into the process-wide switches
    pub fn apply(&self) {
        set_validate_on_read(self.io.validate_on_read);
        set_verify_checksums(self.io.verify_checksums);
        set_validate_on_assignment(self.validation.validate_on_assignment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DataModelConfig::default();
        assert!(config.io.validate_on_read);
        assert!(config.io.verify_checksums);
        assert!(config.validation.validate_on_assignment);
        assert!(config.schemas.extra_dir.is_none());
    }

    #[test]
    fn test_serialize_config() {
        let config = DataModelConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[io]"));
        assert!(toml_str.contains("validate_on_read = true"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[io]\nvalidate_on_read = false\n").unwrap();
        let config = DataModelConfig::load_from(Some(path.to_str().unwrap())).unwrap();
        assert!(!config.io.validate_on_read);
        assert!(config.io.verify_checksums);
        assert!(config.validation.validate_on_assignment);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = DataModelConfig::default();
        config.validation.validate_on_assignment = false;
        config.save(path.to_str().unwrap()).unwrap();
        let back = DataModelConfig::load_from(Some(path.to_str().unwrap())).unwrap();
        assert!(!back.validation.validate_on_assignment);
    }
}
