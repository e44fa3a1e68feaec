//! MTE Relay State Cache
//!
//! Key/value storage for opaque session state and small scalars such as the
//! client id a relay issued. The backend is pluggable through
//! [`StateStore`]; [`MemoryStore`] is the default and [`FileStore`] keeps
//! state across process restarts.
//!
//! ## Keys
//!
//! - `encoder.<origin>.<pairId>` / `decoder.<origin>.<pairId>`: session state
//! - `client_id.<origin>`: client id issued by the relay

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use mterelay_core::{Origin, PairId, RelayError, Role};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse store file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid stored value for {0}")]
    InvalidValue(String),
}

impl From<CacheError> for RelayError {
    fn from(err: CacheError) -> Self {
        RelayError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Backend for session state and client scalars.
///
/// Implementations must not lose a write that completed before a later
/// read began; `take` must hand a value to at most one caller.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove and return a value, giving the caller sole ownership of it
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}

/// Cache key for one direction of a pair's session state
pub fn state_key(role: Role, origin: &Origin, pair_id: &PairId) -> String {
    format!("{}.{}.{}", role, origin, pair_id)
}

/// Cache key for the client id issued by an origin
pub fn client_id_key(origin: &Origin) -> String {
    format!("client_id.{}", origin)
}
