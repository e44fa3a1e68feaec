//! Instance settings

use std::path::{Path, PathBuf};

use mterelay_core::{Mode, MAX_URL_LENGTH, PAIR_ENDPOINT, RELAY_ENDPOINT};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::options::HeaderSelection;
use crate::{default_settings_path, Result, SettingsError};

/// Relay client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Pairs negotiated with each origin
    #[serde(default = "default_number_of_pairs")]
    pub number_of_pairs: usize,

    /// Mode used when a request does not pick one
    #[serde(default)]
    pub default_mode: Mode,

    /// Encode the route and query
    #[serde(default = "default_true")]
    pub encode_url: bool,

    /// Headers moved into the encoded header bag
    #[serde(default)]
    pub encode_headers: HeaderSelection,

    /// Encode request bodies
    #[serde(default = "default_true")]
    pub encode_body: bool,

    /// Idle engine handles kept per (role, mode)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Base delay while waiting on another caller's pairing
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls before giving up on a pending origin
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Longest URL sent after route encoding
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,

    #[serde(default = "default_relay_path")]
    pub relay_path: String,

    #[serde(default = "default_pair_path")]
    pub pair_path: String,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_number_of_pairs() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_poll_attempts() -> u32 {
    19
}

fn default_timeout() -> u64 {
    30
}

fn default_max_url_length() -> usize {
    MAX_URL_LENGTH
}

fn default_relay_path() -> String {
    RELAY_ENDPOINT.to_string()
}

fn default_pair_path() -> String {
    PAIR_ENDPOINT.to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            number_of_pairs: default_number_of_pairs(),
            default_mode: Mode::default(),
            encode_url: true,
            encode_headers: HeaderSelection::default(),
            encode_body: true,
            pool_size: default_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            request_timeout_secs: default_timeout(),
            max_url_length: default_max_url_length(),
            relay_path: default_relay_path(),
            pair_path: default_pair_path(),
            config_path: None,
        }
    }
}

impl RelaySettings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: RelaySettings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            settings
        } else {
            Self::default()
        };
        settings.validate()?;
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn with_number_of_pairs(mut self, number_of_pairs: usize) -> Self {
        self.number_of_pairs = number_of_pairs;
        self
    }

    pub fn with_default_mode(mut self, mode: Mode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_encode_url(mut self, encode_url: bool) -> Self {
        self.encode_url = encode_url;
        self
    }

    /// Base delay and poll count used while another caller is pairing
    pub fn with_polling(mut self, interval_ms: u64, attempts: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self.poll_attempts = attempts;
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.number_of_pairs == 0 {
            return Err(SettingsError::Invalid("number_of_pairs must be at least 1".into()));
        }
        if self.poll_attempts == 0 {
            return Err(SettingsError::Invalid("poll_attempts must be at least 1".into()));
        }
        if self.max_url_length == 0 {
            return Err(SettingsError::Invalid("max_url_length must be positive".into()));
        }
        for (name, path) in [("relay_path", &self.relay_path), ("pair_path", &self.pair_path)] {
            if !path.starts_with('/') {
                return Err(SettingsError::Invalid(format!("{} must start with '/'", name)));
            }
        }
        if let HeaderSelection::Only(names) = &self.encode_headers {
            HeaderSelection::check_names(names)?;
        }
        Ok(())
    }
}
