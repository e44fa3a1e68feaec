//! Per-request overrides and their resolution against instance settings

use mterelay_core::Mode;
use serde::{Deserialize, Serialize};

use crate::config::RelaySettings;
use crate::{Result, SettingsError};

/// Which request headers travel inside the encoded header bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderSelection {
    /// Every header on the request
    #[default]
    All,
    /// No header, except `content-type` when the body is encoded
    None,
    /// Named headers only (case-insensitive)
    Only(Vec<String>),
}

impl HeaderSelection {
    /// Whether a header with this name is selected
    pub fn selects(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Only(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
        }
    }

    /// Validate names as HTTP header field names
    pub fn check_names(names: &[String]) -> Result<()> {
        for name in names {
            let valid = !name.is_empty()
                && name.bytes().all(|b| {
                    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
                });
            if !valid {
                return Err(SettingsError::Invalid(format!("invalid header name: {:?}", name)));
            }
        }
        Ok(())
    }
}

/// Overrides for a single request; unset fields use the instance settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub mode: Option<Mode>,
    pub encode_url: Option<bool>,
    pub encode_headers: Option<HeaderSelection>,
    pub encode_body: Option<bool>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn encode_url(mut self, enabled: bool) -> Self {
        self.encode_url = Some(enabled);
        self
    }

    pub fn encode_headers(mut self, selection: HeaderSelection) -> Self {
        self.encode_headers = Some(selection);
        self
    }

    pub fn encode_body(mut self, enabled: bool) -> Self {
        self.encode_body = Some(enabled);
        self
    }
}

/// Effective options for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub mode: Mode,
    pub encode_url: bool,
    pub encode_headers: HeaderSelection,
    pub encode_body: bool,
}

impl ResolvedOptions {
    /// Apply request overrides on top of instance settings
    pub fn resolve(request: &RequestOptions, settings: &RelaySettings) -> Result<Self> {
        let encode_headers = request
            .encode_headers
            .clone()
            .unwrap_or_else(|| settings.encode_headers.clone());
        if let HeaderSelection::Only(names) = &encode_headers {
            HeaderSelection::check_names(names)?;
        }

        Ok(Self {
            mode: request.mode.unwrap_or(settings.default_mode),
            encode_url: request.encode_url.unwrap_or(settings.encode_url),
            encode_headers,
            encode_body: request.encode_body.unwrap_or(settings.encode_body),
        })
    }
}
