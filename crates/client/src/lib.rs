//! MTE Relay Client
//!
//! Sends HTTP requests through an MTE relay so that URL, headers and body
//! travel encoded. The client discovers relays on first contact, negotiates
//! a small set of encoder/decoder pairs per origin, rotates through them and
//! recovers once from a lost or desynchronized session.
//!
//! ```no_run
//! # async fn run() -> mterelay_client::Result<()> {
//! use mterelay_client::{RelayClient, RelayRequest};
//!
//! let client = RelayClient::new()?;
//! let response = client
//!     .request(RelayRequest::post("https://api.example.com/items").json(serde_json::json!({"a": 1})))
//!     .await?;
//! println!("{}", response.text()?);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod codec;
pub mod context;
pub mod origin;
pub mod pairing;
pub mod pairs;
mod payload;
mod request;
mod response;
mod transport;

pub use client::{RelayClient, RelayClientBuilder};
pub use payload::{EncodedBody, Payload, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE};
pub use request::{PreparedRequest, RelayRequest};
pub use response::RelayResponse;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

pub use mterelay_cache::{FileStore, MemoryStore, StateStore};
pub use mterelay_core::{ClientId, Mode, Origin, OriginStatus, PairId, RelayError, Result};
pub use mterelay_crypto::{EngineFactory, SoftwareEngineFactory};
pub use mterelay_settings::{HeaderSelection, RelaySettings, RequestOptions};
