//! Domain types shared across the relay client crates

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// Canonical `scheme://host[:port]` of a remote relay
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Wrap an already-canonical origin string.
    ///
    /// Trailing slashes are dropped so `https://a.test/` and `https://a.test`
    /// key the same record.
    pub fn new(origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        let trimmed = origin.trim().trim_end_matches('/');
        let (scheme, host) = trimmed
            .split_once("://")
            .ok_or_else(|| RelayError::InvalidInput(format!("origin without scheme: {}", origin)))?;
        if !matches!(scheme, "http" | "https") {
            return Err(RelayError::InvalidInput(format!(
                "unsupported scheme in origin: {}",
                origin
            )));
        }
        if host.is_empty() || host.contains('/') {
            return Err(RelayError::InvalidInput(format!("invalid origin: {}", origin)));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Derive the origin of a full request URL.
    ///
    /// Path, query and fragment are dropped; default ports are elided.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| RelayError::InvalidInput(format!("URL without scheme: {}", url)))?;
        let authority = rest
            .split(|c| matches!(c, '/' | '?' | '#'))
            .next()
            .unwrap_or_default();
        if authority.contains('@') {
            return Err(RelayError::InvalidInput(format!(
                "credentials in URL are not supported: {}",
                url
            )));
        }
        let scheme = scheme.to_ascii_lowercase();
        let authority = match (scheme.as_str(), authority.rsplit_once(':')) {
            ("http", Some((host, "80"))) | ("https", Some((host, "443"))) => host,
            _ => authority,
        };
        Self::new(format!("{}://{}", scheme, authority))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one encoder/decoder session pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(String);

impl PairId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 128-bit pair id (hex)
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the relay issues to this client once validated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cryptographic transform offered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Token replacement only (larger payloads)
    Mte,
    /// Managed-key encryption with session-derived keys
    #[default]
    Mke,
}

impl Mode {
    /// Numeric flag used on the wire
    pub fn as_flag(&self) -> u8 {
        match self {
            Self::Mte => 0,
            Self::Mke => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::Mte),
            1 => Some(Self::Mke),
            _ => None,
        }
    }
}

/// Direction a session state is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Encoder,
    Decoder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Decoder => "decoder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-origin validation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginStatus {
    /// Never seen
    Unknown,
    /// The caller that observes this must run the handshake
    Validating,
    /// Another caller is pairing, wait
    Pending,
    /// Pairs are available
    Paired,
    /// Not a relay, or pairing failed
    Invalid,
}

impl OriginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Validating => "validating",
            Self::Pending => "pending",
            Self::Paired => "paired",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for OriginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OriginStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "validating" => Ok(Self::Validating),
            "pending" => Ok(Self::Pending),
            "paired" => Ok(Self::Paired),
            "invalid" => Ok(Self::Invalid),
            other => Err(RelayError::InvalidInput(format!("unknown origin status: {}", other))),
        }
    }
}
