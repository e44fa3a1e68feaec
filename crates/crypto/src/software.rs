//! Software session engine
//!
//! Reference engine built on the dalek/RustCrypto stack:
//!
//! 1. Session seed = SHA-256 over (entropy, nonce, personalization)
//! 2. Each message uses a key derived from the current chain key and counter
//! 3. Payload is sealed with ChaCha20-Poly1305, then the chain ratchets forward
//!
//! Message layout: `[mode: u8] [counter: u64 BE] [ciphertext + tag]`.
//! Token mode additionally pads the plaintext to 32-byte blocks.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use mterelay_core::{Mode, Role};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::{EngineError, EngineFactory, SessionEngine};
use crate::keys::{hash, EcdhKeypair, KeyExchange};

/// Minimum entropy accepted by `instantiate`
pub const MIN_ENTROPY_LEN: usize = 32;

/// Messages a session may carry before it must be re-paired
pub const DEFAULT_RESEED_INTERVAL: u64 = 1 << 32;

/// How far ahead of the local counter an incoming message may be
pub const MAX_SKIP: u64 = 64;

const HEADER_LEN: usize = 1 + 8;
const TAG_LEN: usize = 16;
const TOKEN_BLOCK: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainState {
    role: Role,
    chain_key: [u8; 32],
    counter: u64,
    reseed_interval: u64,
}

impl ChainState {
    fn message_key(&self, mode: Mode) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.chain_key);
        hasher.update(match mode {
            Mode::Mte => b"mterelay-token",
            Mode::Mke => b"mterelay-mkey!",
        });
        hasher.update(self.counter.to_be_bytes());
        hasher.finalize().into()
    }

    fn advance(&mut self) {
        let mut material = Vec::with_capacity(32 + 16);
        material.extend_from_slice(&self.chain_key);
        material.extend_from_slice(b"mterelay-ratchet");
        self.chain_key = hash(&material);
        self.counter += 1;
    }
}

fn aead_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn associated_data(mode: Mode, counter: u64) -> [u8; HEADER_LEN] {
    let mut ad = [0u8; HEADER_LEN];
    ad[0] = mode.as_flag();
    ad[1..].copy_from_slice(&counter.to_be_bytes());
    ad
}

fn pad_tokens(data: &[u8]) -> Vec<u8> {
    let unpadded = 4 + data.len();
    let padded = unpadded.div_ceil(TOKEN_BLOCK) * TOKEN_BLOCK;
    let mut out = Vec::with_capacity(padded);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out.resize(padded, 0);
    out
}

fn unpad_tokens(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    if data.len() < 4 {
        return Err(EngineError::DecodeFailed("token block too short".to_string()));
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    data.get(4..4 + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| EngineError::DecodeFailed("token length out of range".to_string()))
}

/// Engine handle backed by a SHA-256 hash chain and ChaCha20-Poly1305
pub struct SoftwareEngine {
    role: Role,
    mode: Mode,
    reseed_interval: u64,
    state: Option<ChainState>,
}

impl SoftwareEngine {
    pub fn new(role: Role, mode: Mode) -> Self {
        Self::with_reseed_interval(role, mode, DEFAULT_RESEED_INTERVAL)
    }

    /// Create a handle whose new sessions must reseed after `interval` messages
    pub fn with_reseed_interval(role: Role, mode: Mode, interval: u64) -> Self {
        Self {
            role,
            mode,
            reseed_interval: interval,
            state: None,
        }
    }

    /// Messages processed by the bound session
    pub fn counter(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.counter)
    }

    fn bound_mut(&mut self) -> Result<&mut ChainState, EngineError> {
        self.state.as_mut().ok_or(EngineError::NotInstantiated)
    }
}

impl SessionEngine for SoftwareEngine {
    fn role(&self) -> Role {
        self.role
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn instantiate(
        &mut self,
        entropy: &[u8],
        nonce: &str,
        personalization: &str,
    ) -> Result<(), EngineError> {
        if entropy.len() < MIN_ENTROPY_LEN {
            return Err(EngineError::InvalidEntropy(MIN_ENTROPY_LEN));
        }

        let mut hasher = Sha256::new();
        hasher.update(b"mterelay-seed");
        for part in [entropy, nonce.as_bytes(), personalization.as_bytes()] {
            hasher.update((part.len() as u32).to_be_bytes());
            hasher.update(part);
        }

        self.state = Some(ChainState {
            role: self.role,
            chain_key: hasher.finalize().into(),
            counter: 0,
            reseed_interval: self.reseed_interval,
        });
        Ok(())
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), EngineError> {
        let restored: ChainState =
            bincode::deserialize(state).map_err(|e| EngineError::CorruptState(e.to_string()))?;
        if restored.role != self.role {
            return Err(EngineError::RoleMismatch(restored.role));
        }
        self.state = Some(restored);
        Ok(())
    }

    fn save_state(&self) -> Result<Vec<u8>, EngineError> {
        let state = self.state.as_ref().ok_or(EngineError::NotInstantiated)?;
        bincode::serialize(state).map_err(|e| EngineError::CorruptState(e.to_string()))
    }

    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        if self.role != Role::Encoder {
            return Err(EngineError::EncodeFailed("decoder handle cannot encode".to_string()));
        }
        let mode = self.mode;
        let state = self.bound_mut()?;
        if state.counter >= state.reseed_interval {
            return Err(EngineError::ReseedRequired);
        }

        let plaintext = match mode {
            Mode::Mte => pad_tokens(data),
            Mode::Mke => data.to_vec(),
        };

        let key = state.message_key(mode);
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| EngineError::EncodeFailed("invalid key".to_string()))?;
        let nonce_bytes = aead_nonce(state.counter);
        let ad = associated_data(mode, state.counter);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &ad,
                },
            )
            .map_err(|_| EngineError::EncodeFailed("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(&ad);
        out.extend_from_slice(&ciphertext);

        state.advance();
        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        if self.role != Role::Decoder {
            return Err(EngineError::DecodeFailed("encoder handle cannot decode".to_string()));
        }
        let mode = self.mode;
        let state = self.bound_mut()?;

        if data.len() < HEADER_LEN + TAG_LEN {
            return Err(EngineError::DecodeFailed("message too short".to_string()));
        }
        if data[0] != mode.as_flag() {
            return Err(EngineError::DecodeFailed("mode mismatch".to_string()));
        }
        let mut counter_bytes = [0u8; 8];
        counter_bytes.copy_from_slice(&data[1..HEADER_LEN]);
        let counter = u64::from_be_bytes(counter_bytes);

        if counter >= state.reseed_interval {
            return Err(EngineError::ReseedRequired);
        }
        if counter < state.counter {
            return Err(EngineError::DecodeFailed(
                "message replayed or out of order".to_string(),
            ));
        }
        if counter - state.counter > MAX_SKIP {
            return Err(EngineError::DecodeFailed("sequence window exceeded".to_string()));
        }

        let mut candidate = state.clone();
        while candidate.counter < counter {
            candidate.advance();
        }

        let key = candidate.message_key(mode);
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| EngineError::DecodeFailed("invalid key".to_string()))?;
        let nonce_bytes = aead_nonce(counter);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &data[HEADER_LEN..],
                    aad: &data[..HEADER_LEN],
                },
            )
            .map_err(|_| EngineError::DecodeFailed("authentication failed".to_string()))?;

        let plaintext = match mode {
            Mode::Mte => unpad_tokens(&plaintext)?,
            Mode::Mke => plaintext,
        };

        candidate.advance();
        *state = candidate;
        Ok(plaintext)
    }

    fn uninstantiate(&mut self) {
        self.state = None;
    }
}

/// Factory for [`SoftwareEngine`] handles and X25519 keypairs
#[derive(Debug, Clone)]
pub struct SoftwareEngineFactory {
    reseed_interval: u64,
}

impl SoftwareEngineFactory {
    pub fn new() -> Self {
        Self {
            reseed_interval: DEFAULT_RESEED_INTERVAL,
        }
    }

    pub fn with_reseed_interval(reseed_interval: u64) -> Self {
        Self { reseed_interval }
    }
}

impl Default for SoftwareEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for SoftwareEngineFactory {
    fn create(&self, role: Role, mode: Mode) -> Box<dyn SessionEngine> {
        Box::new(SoftwareEngine::with_reseed_interval(
            role,
            mode,
            self.reseed_interval,
        ))
    }

    fn keypair(&self) -> Box<dyn KeyExchange> {
        Box::new(EcdhKeypair::generate())
    }
}
