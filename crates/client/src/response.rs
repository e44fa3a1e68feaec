//! Decoded relay response

use std::collections::HashMap;

use mterelay_core::{ClientId, PairId, RelayError, Result};
use serde::de::DeserializeOwned;

/// Plaintext response after the relay layer has been removed
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub(crate) status: u16,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
    pub(crate) client_id: Option<ClientId>,
    pub(crate) pair_id: Option<PairId>,
}

impl RelayResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers, names lowercase
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.clone())
            .map_err(|e| RelayError::Serialization(format!("response is not UTF-8: {}", e)))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Client id the relay reported with this response
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Pair the relay used to encode this response
    pub fn pair_id(&self) -> Option<&PairId> {
        self.pair_id.as_ref()
    }
}
