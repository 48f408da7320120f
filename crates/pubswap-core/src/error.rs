//! Error types for pubswap

use thiserror::Error;

use crate::PeerId;

/// Core pubswap errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PubswapError {
    // Wire errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Transport errors
    #[error("Connect to peer {0} timed out")]
    ConnectTimeout(PeerId),

    #[error("Connect to peer {peer} failed: {reason}")]
    ConnectFailed { peer: PeerId, reason: String },

    #[error("Send to peer {0} timed out")]
    SendTimeout(PeerId),

    #[error("Send to peer {peer} failed: {reason}")]
    SendFailed { peer: PeerId, reason: String },

    // API errors
    #[error("Incorrectly formatted key: {0}")]
    InvalidKeyEncoding(String),

    #[error("Node is not online")]
    NotOnline,

    #[error("Exchange does not support topic announcements")]
    UnsupportedExchange,

    #[error("Exchange is shutting down")]
    Shutdown,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PubswapError {
    /// Shorthand for a malformed frame with a static reason
    pub fn malformed(reason: impl Into<String>) -> Self {
        PubswapError::MalformedMessage(reason.into())
    }

    /// Whether the error only affects a single peer's flush cycle
    pub fn is_peer_io(&self) -> bool {
        matches!(
            self,
            PubswapError::ConnectTimeout(_)
                | PubswapError::ConnectFailed { .. }
                | PubswapError::SendTimeout(_)
                | PubswapError::SendFailed { .. }
        )
    }
}

/// Result type for pubswap operations
pub type PubswapResult<T> = Result<T, PubswapError>;
