use thiserror::Error;

/// How the orchestrator may recover from an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Evict the pair that failed and retry with a fresh one
    Pair,
    /// Forget the client id, re-validate and re-pair the whole origin
    Origin,
    /// Not recoverable, surface immediately
    None,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Origin is not an MTE relay: {0}")]
    OriginNotRelay(String),

    #[error("Pairing failed: {0}")]
    PairingFailed(String),

    #[error("Repair required")]
    RepairRequired,

    #[error("State not found: {0}")]
    StateNotFound(String),

    #[error("Failed to encode: {0}")]
    EncodeFailed(String),

    #[error("Failed to decode: {0}")]
    DecodeFailed(String),

    #[error("Invalid client id")]
    ClientIdInvalid,

    #[error("DRBG reseed is required")]
    ReseedRequired,

    #[error("Origin {0} is marked invalid")]
    OriginInvalid(String),

    #[error("Timed out waiting for {0} to finish pairing")]
    PendingTimeout(String),

    #[error("No pairs available for {0}")]
    QueueEmpty(String),

    #[error("Encoded URL is {length} characters, limit is {limit}")]
    UrlTooLong { length: usize, limit: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),

    #[error("Invalid relay header: {0}")]
    InvalidHeader(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Request failed after retry: {source}")]
    RetryExhausted {
        #[source]
        source: Box<RelayError>,
    },
}

/// First status code of the relay protocol error range
pub const RELAY_STATUS_MIN: u16 = 557;
/// Last status code of the relay protocol error range
pub const RELAY_STATUS_MAX: u16 = 566;

impl RelayError {
    /// Protocol status code for relay errors, `None` for generic failures
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::OriginNotRelay(_) => Some(557),
            Self::PairingFailed(_) => Some(558),
            Self::RepairRequired => Some(559),
            Self::StateNotFound(_) => Some(560),
            Self::EncodeFailed(_) => Some(561),
            Self::DecodeFailed(_) => Some(562),
            Self::ClientIdInvalid => Some(565),
            Self::ReseedRequired => Some(566),
            Self::RetryExhausted { source } => source.status_code(),
            _ => None,
        }
    }

    /// Map a status code reported by the relay back into an error.
    ///
    /// Returns `None` for codes outside the relay range so ordinary
    /// application responses pass through untouched.
    pub fn from_status(status: u16, detail: &str) -> Option<Self> {
        let detail = detail.trim().to_string();
        match status {
            557 => Some(Self::OriginNotRelay(detail)),
            558 => Some(Self::PairingFailed(detail)),
            559 => Some(Self::RepairRequired),
            560 => Some(Self::StateNotFound(detail)),
            561 => Some(Self::EncodeFailed(detail)),
            562 => Some(Self::DecodeFailed(detail)),
            // 563/564 are the relay's cache read/write failures; the state is gone either way
            563 | 564 => Some(Self::StateNotFound(detail)),
            565 => Some(Self::ClientIdInvalid),
            566 => Some(Self::ReseedRequired),
            _ => None,
        }
    }

    /// Recovery policy for this error
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::RepairRequired
            | Self::StateNotFound(_)
            | Self::EncodeFailed(_)
            | Self::DecodeFailed(_)
            | Self::ReseedRequired => Recovery::Pair,
            Self::ClientIdInvalid => Recovery::Origin,
            _ => Recovery::None,
        }
    }

    /// True when the error is part of the relay protocol taxonomy
    pub fn is_protocol_error(&self) -> bool {
        self.status_code().is_some()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
