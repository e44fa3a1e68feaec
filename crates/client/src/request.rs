//! Relay request building
//!
//! [`RelayRequest`] is what applications construct. Before the first attempt
//! it is checked and frozen into a [`PreparedRequest`] so retries re-encode
//! the same plaintext.

use mterelay_core::{Mode, Origin, RelayError, Result};
use mterelay_settings::{HeaderSelection, RelaySettings, RequestOptions, ResolvedOptions};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};

use crate::payload::Payload;

/// Builder for requests sent through a relay
#[derive(Debug)]
pub struct RelayRequest {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    payload: Payload,
    options: RequestOptions,
}

impl RelayRequest {
    /// Create a new request builder
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            headers: Vec::new(),
            payload: Payload::Empty,
            options: RequestOptions::default(),
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: &str) -> Self {
        Self::new("POST", url)
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Set request body
    pub fn body(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn json(self, value: serde_json::Value) -> Self {
        self.body(Payload::Json(value))
    }

    pub fn form(self, fields: Vec<(String, String)>) -> Self {
        self.body(Payload::Form(fields))
    }

    /// Replace all per-request overrides
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.options.mode = Some(mode);
        self
    }

    pub fn encode_url(mut self, enabled: bool) -> Self {
        self.options.encode_url = Some(enabled);
        self
    }

    pub fn encode_headers(mut self, selection: HeaderSelection) -> Self {
        self.options.encode_headers = Some(selection);
        self
    }

    pub fn encode_body(mut self, enabled: bool) -> Self {
        self.options.encode_body = Some(enabled);
        self
    }

    /// Validate and freeze the request
    pub fn prepare(self, settings: &RelaySettings) -> Result<PreparedRequest> {
        Method::from_bytes(self.method.as_bytes())
            .map_err(|_| RelayError::InvalidInput(format!("invalid method: {}", self.method)))?;

        let url = Url::parse(&self.url)
            .map_err(|e| RelayError::InvalidInput(format!("invalid URL {}: {}", self.url, e)))?;
        let origin = Origin::parse(url.as_str())?;
        let options = ResolvedOptions::resolve(&self.options, settings)?;

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        for (key, value) in self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| RelayError::InvalidInput(format!("invalid header name: {}", key)))?;
            HeaderValue::from_str(&value)
                .map_err(|_| RelayError::InvalidInput(format!("invalid value for header {}", key)))?;
            headers.push((name.as_str().to_string(), value));
        }

        let body = self.payload.into_body()?;
        if let Some(content_type) = body.as_ref().and_then(|b| b.content_type) {
            if !headers.iter().any(|(k, _)| k == CONTENT_TYPE.as_str()) {
                headers.push((CONTENT_TYPE.as_str().to_string(), content_type.to_string()));
            }
        }

        Ok(PreparedRequest {
            method: self.method,
            url,
            origin,
            headers,
            body: body.map(|b| b.bytes).filter(|b| !b.is_empty()),
            options,
        })
    }
}

/// Checked plaintext request, reused across attempts
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: String,
    pub url: Url,
    pub origin: Origin,
    /// Header names are lowercase
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub options: ResolvedOptions,
}

impl PreparedRequest {
    /// Path plus query, as the relay should route it
    pub fn route(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
