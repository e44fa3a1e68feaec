//! Engine seam
//!
//! The relay client never looks inside session state. It drives an engine
//! handle through restore → transform → save, and the engine owns the
//! cryptography.

use mterelay_core::{Mode, RelayError, Role};
use thiserror::Error;

use crate::keys::KeyExchange;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine is not instantiated")]
    NotInstantiated,
    #[error("Invalid entropy: need at least {0} bytes")]
    InvalidEntropy(usize),
    #[error("State belongs to a {0} session")]
    RoleMismatch(Role),
    #[error("Corrupt session state: {0}")]
    CorruptState(String),
    #[error("Encode failed: {0}")]
    EncodeFailed(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("Reseed required")]
    ReseedRequired,
    #[error("Invalid public key")]
    InvalidPublicKey,
}

impl From<EngineError> for RelayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ReseedRequired => RelayError::ReseedRequired,
            EngineError::EncodeFailed(msg) => RelayError::EncodeFailed(msg),
            EngineError::DecodeFailed(msg) => RelayError::DecodeFailed(msg),
            EngineError::NotInstantiated
            | EngineError::RoleMismatch(_)
            | EngineError::CorruptState(_) => RelayError::RepairRequired,
            other @ (EngineError::InvalidEntropy(_) | EngineError::InvalidPublicKey) => {
                RelayError::PairingFailed(other.to_string())
            }
        }
    }
}

/// One encoder or decoder handle.
///
/// A handle is bound to a session only between `restore_state` (or
/// `instantiate`) and `uninstantiate`.
pub trait SessionEngine: Send {
    fn role(&self) -> Role;

    fn mode(&self) -> Mode;

    /// Start a fresh session from key-exchange entropy
    fn instantiate(
        &mut self,
        entropy: &[u8],
        nonce: &str,
        personalization: &str,
    ) -> Result<(), EngineError>;

    /// Bind a previously saved session
    fn restore_state(&mut self, state: &[u8]) -> Result<(), EngineError>;

    /// Serialize the bound session
    fn save_state(&self) -> Result<Vec<u8>, EngineError>;

    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>, EngineError>;

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Drop the bound session, leaving the handle reusable
    fn uninstantiate(&mut self);
}

/// Creates engine handles and key-exchange keypairs
pub trait EngineFactory: Send + Sync {
    fn create(&self, role: Role, mode: Mode) -> Box<dyn SessionEngine>;

    fn keypair(&self) -> Box<dyn KeyExchange>;
}
