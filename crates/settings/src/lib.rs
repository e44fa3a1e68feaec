//! MTE Relay Settings
//!
//! Instance-wide defaults for the relay client and per-request overrides.
//!
//! ## Precedence
//!
//! A value set on [`RequestOptions`] wins over the instance
//! [`RelaySettings`], which in turn fall back to built-in defaults for any
//! field missing from the settings file.
//!
//! ## Usage
//!
//! ```no_run
//! use mterelay_settings::RelaySettings;
//!
//! // Load or create default settings
//! let mut settings = RelaySettings::load_or_default()?;
//!
//! settings.number_of_pairs = 8;
//! settings.save()?;
//! # Ok::<(), mterelay_settings::SettingsError>(())
//! ```

mod config;
mod options;

pub use config::RelaySettings;
pub use options::{HeaderSelection, RequestOptions, ResolvedOptions};

use std::path::PathBuf;

use mterelay_core::RelayError;
use thiserror::Error;

/// Environment variable overriding the settings file location
pub const CONFIG_ENV: &str = "MTERELAY_CONFIG";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

impl From<SettingsError> for RelayError {
    fn from(err: SettingsError) -> Self {
        RelayError::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mterelay")
        .join("settings.json")
}
