//! HTTP transport seam
//!
//! The client hands fully encoded requests to a [`Transport`] and gets raw
//! responses back. [`ReqwestTransport`] is the default.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mterelay_core::{RelayError, Result};
use reqwest::Method;
use tracing::debug;

/// Request as sent on the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Target URL
    pub url: String,
    /// Request headers, names lowercase
    pub headers: Vec<(String, String)>,
    /// Request body (if any)
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response as received from the wire
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercase
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self { status, headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(network_error)?;
        Ok(Self { http_client })
    }

    /// Use a preconfigured client (proxies, TLS roots, ...)
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

fn network_error(err: reqwest::Error) -> RelayError {
    RelayError::Network(err.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| RelayError::InvalidInput(format!("Unsupported method: {}", request.method)))?;
        let mut req = self.http_client.request(method, &request.url);

        for (key, value) in &request.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        debug!("{} {}", request.method, request.url);
        let response = req.send().await.map_err(network_error)?;
        let status = response.status().as_u16();

        let mut headers: HashMap<String, String> = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers
                    .entry(key.as_str().to_string())
                    .and_modify(|existing| {
                        existing.push_str(", ");
                        existing.push_str(v);
                    })
                    .or_insert_with(|| v.to_string());
            }
        }

        let body = response.bytes().await.map_err(network_error)?.to_vec();

        Ok(HttpResponse::new(status, headers, body))
    }
}
