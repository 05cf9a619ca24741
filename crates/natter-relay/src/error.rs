//! Error types for the chat relay.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Chat relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (listener, socket setup)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Read or write failure on a session's stream
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Peer sent a message that is not valid in the current session state
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is the peer closing its stream.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }
}

/// Failures of the framed message stream.
///
/// Every variant is fatal to the session that observes it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream
    #[error("stream closed by peer")]
    Closed,

    /// A frame exceeded the configured maximum length
    #[error("frame exceeds maximum length")]
    FrameTooLong,

    /// A frame could not be encoded or decoded as a protocol message
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<LinesCodecError> for TransportError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::FrameTooLong,
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

/// Message store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A log lock was poisoned by a panicking writer
    #[error("log for {identity} is poisoned")]
    Poisoned {
        /// Owner of the poisoned log
        identity: String,
    },
}

impl StoreError {
    pub(crate) fn poisoned(identity: impl Into<String>) -> Self {
        Self::Poisoned {
            identity: identity.into(),
        }
    }
}
