//! Relay wire header
//!
//! Every relay request and response carries one compact header:
//!
//! ```text
//! x-mte-relay: <clientId>,<pairId>,<mode>,<urlEncoded>,<headersEncoded>,<bodyEncoded>
//! ```
//!
//! `mode` is 0 (token-only) or 1 (managed-key); the three flags are 0 or 1.
//! The client id and pair id may be empty on probe requests. Trailing fields
//! may be omitted by a probe response, in which case they read as 0.

use std::fmt;
use std::str::FromStr;

use crate::{ClientId, Mode, PairId, RelayError, Result};

/// Name of the wire header
pub const RELAY_HEADER: &str = "x-mte-relay";

/// Name of the header carrying the base64 encoded header bag
pub const ENCODED_HEADERS_HEADER: &str = "x-mte-relay-eh";

/// Probe endpoint, relative to the origin
pub const RELAY_ENDPOINT: &str = "/api/mte-relay";

/// Pairing endpoint, relative to the origin
pub const PAIR_ENDPOINT: &str = "/api/mte-pair";

/// Content type substituted for encoded bodies
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Longest URL ordinary HTTP infrastructure is expected to route
pub const MAX_URL_LENGTH: usize = 2048;

const FIELD_COUNT: usize = 6;

/// Parsed form of the `x-mte-relay` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireHeader {
    pub client_id: Option<ClientId>,
    pub pair_id: Option<PairId>,
    pub mode: Mode,
    pub url_encoded: bool,
    pub headers_encoded: bool,
    pub body_encoded: bool,
}

impl WireHeader {
    /// Header for a probe request: only the client id, if one is known
    pub fn probe(client_id: Option<ClientId>) -> Self {
        Self {
            client_id,
            pair_id: None,
            mode: Mode::Mte,
            url_encoded: false,
            headers_encoded: false,
            body_encoded: false,
        }
    }

    /// Header describing an encoded request
    pub fn request(client_id: Option<ClientId>, pair_id: PairId, mode: Mode) -> Self {
        Self {
            client_id,
            pair_id: Some(pair_id),
            mode,
            url_encoded: false,
            headers_encoded: false,
            body_encoded: false,
        }
    }

    /// Serialize into the header value
    pub fn to_header_value(&self) -> String {
        self.to_string()
    }

    /// Parse a header value
    pub fn parse(value: &str) -> Result<Self> {
        value.parse()
    }

    /// True when nothing was encoded
    pub fn is_plain(&self) -> bool {
        !(self.url_encoded || self.headers_encoded || self.body_encoded)
    }
}

fn flag(b: bool) -> char {
    if b {
        '1'
    } else {
        '0'
    }
}

fn parse_flag(field: &str, name: &str) -> Result<bool> {
    match field {
        "" | "0" => Ok(false),
        "1" => Ok(true),
        other => Err(RelayError::InvalidHeader(format!(
            "{} flag must be 0 or 1, got {:?}",
            name, other
        ))),
    }
}

impl fmt::Display for WireHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.client_id.as_ref().map(ClientId::as_str).unwrap_or(""),
            self.pair_id.as_ref().map(PairId::as_str).unwrap_or(""),
            self.mode.as_flag(),
            flag(self.url_encoded),
            flag(self.headers_encoded),
            flag(self.body_encoded),
        )
    }
}

impl FromStr for WireHeader {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RelayError::InvalidHeader("empty header".to_string()));
        }

        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() > FIELD_COUNT {
            return Err(RelayError::InvalidHeader(format!(
                "expected at most {} fields, got {}",
                FIELD_COUNT,
                fields.len()
            )));
        }
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        let client_id = Some(field(0))
            .filter(|s| !s.is_empty())
            .map(ClientId::new);
        let pair_id = Some(field(1)).filter(|s| !s.is_empty()).map(PairId::new);

        let mode = match field(2) {
            "" => Mode::Mte,
            raw => raw
                .parse::<u8>()
                .ok()
                .and_then(Mode::from_flag)
                .ok_or_else(|| RelayError::InvalidHeader(format!("invalid mode {:?}", raw)))?,
        };

        Ok(Self {
            client_id,
            pair_id,
            mode,
            url_encoded: parse_flag(field(3), "url")?,
            headers_encoded: parse_flag(field(4), "headers")?,
            body_encoded: parse_flag(field(5), "body")?,
        })
    }
}
