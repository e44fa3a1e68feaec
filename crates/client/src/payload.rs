//! Request body variants
//!
//! Each variant has exactly one way of turning into bytes and an implied
//! content type. Streaming bodies cannot be encoded in one engine call and
//! are rejected.

use std::fmt;

use bytes::Bytes;
use futures::stream::BoxStream;
use mterelay_core::{RelayError, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Default)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

/// Serialized payload ready for the codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<&'static str>,
}

impl Payload {
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Serialize the body; `None` when there is nothing to send
    pub fn into_body(self) -> Result<Option<EncodedBody>> {
        let body = match self {
            Self::Empty => return Ok(None),
            Self::Text(text) => EncodedBody {
                bytes: text.into_bytes(),
                content_type: Some(TEXT_CONTENT_TYPE),
            },
            Self::Bytes(bytes) => EncodedBody {
                bytes,
                content_type: None,
            },
            Self::Json(value) => EncodedBody {
                bytes: serde_json::to_vec(&value)
                    .map_err(|e| RelayError::Serialization(e.to_string()))?,
                content_type: Some(JSON_CONTENT_TYPE),
            },
            Self::Form(fields) => EncodedBody {
                bytes: form_urlencode(&fields)?.into_bytes(),
                content_type: Some(FORM_CONTENT_TYPE),
            },
            Self::Stream(_) => {
                return Err(RelayError::UnsupportedPayload(
                    "streaming bodies cannot be relayed".to_string(),
                ))
            }
        };
        Ok(Some(body))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Form(fields) => f.debug_tuple("Form").field(fields).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

// `Url` carries the urlencoded serializer
fn form_urlencode(fields: &[(String, String)]) -> Result<String> {
    let mut scratch = reqwest::Url::parse("http://form.invalid/")
        .map_err(|e| RelayError::Serialization(e.to_string()))?;
    scratch
        .query_pairs_mut()
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    Ok(scratch.query().unwrap_or_default().to_string())
}
