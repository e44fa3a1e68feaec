use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::EngineError;

/// Length of personalization strings generated for new sessions
pub const PERSONALIZATION_LEN: usize = 32;

/// Key-exchange primitive used during pairing.
///
/// Public material travels as base64 strings inside the pairing JSON.
pub trait KeyExchange: Send {
    /// Our public key, base64
    fn public_key(&self) -> String;

    /// Derive shared entropy from the remote party's public key (base64)
    fn derive_shared(&self, foreign_public_key: &str) -> Result<[u8; 32], EngineError>;
}

/// Keypair for session key agreement (X25519)
pub struct EcdhKeypair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl Clone for EcdhKeypair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.as_bytes())
    }
}

impl EcdhKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key as bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Perform Diffie-Hellman key exchange
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        *shared.as_bytes()
    }
}

impl KeyExchange for EcdhKeypair {
    fn public_key(&self) -> String {
        STANDARD.encode(self.public_key_bytes())
    }

    fn derive_shared(&self, foreign_public_key: &str) -> Result<[u8; 32], EngineError> {
        let bytes = STANDARD
            .decode(foreign_public_key.trim())
            .map_err(|_| EngineError::InvalidPublicKey)?;
        let their_public: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EngineError::InvalidPublicKey)?;

        let shared = self.diffie_hellman(&their_public);
        // All-zero output means a low-order point was supplied
        if shared.iter().all(|b| *b == 0) {
            return Err(EngineError::InvalidPublicKey);
        }
        Ok(shared)
    }
}

/// Random alphanumeric personalization string
pub fn generate_personalization() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PERSONALIZATION_LEN)
        .map(char::from)
        .collect()
}

/// Random nonce for session instantiation, as a decimal string
pub fn generate_nonce() -> String {
    OsRng.gen::<u64>().to_string()
}

/// Hash data using SHA-256
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
