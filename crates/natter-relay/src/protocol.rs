//! Protocol messages exchanged between clients and the relay.
//!
//! Messages are internally tagged JSON objects, one per frame:
//!
//! ```text
//! client -> {"type":"auth","username":"alice"}
//! server <- {"type":"auth_ack"}
//! client -> {"type":"chat","to":"bob","content":"hi"}
//! server <- {"type":"err","code":"person_not_found","message":"bob is not online"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::StoredMessage;
use crate::types::Identity;

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Login; the only message accepted before authentication.
    Auth {
        /// Identity to bind the session to
        username: Identity,
    },

    /// Send text to another identity.
    Chat {
        /// Recipient identity
        to: Identity,
        /// Message text
        content: String,
    },

    /// Replay the caller's own log.
    History {
        /// First sequence number to return
        #[serde(default)]
        since_seq: u64,
    },

    /// Any well-formed message whose `type` the relay does not know.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Short name of the message type, for logs and error text.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::History { .. } => "history",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// Messages sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Login accepted.
    AuthAck,

    /// Text routed from another identity.
    Chat {
        /// Sender identity
        from: Identity,
        /// Message text
        content: String,
    },

    /// Request failed.
    Err {
        /// Machine-readable error code
        code: ErrorCode,
        /// Human-readable description
        message: String,
    },

    /// Reply to a history request.
    History {
        /// Log entries, oldest first
        messages: Vec<StoredMessage>,
    },
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Err {
            code,
            message: message.into(),
        }
    }

    /// Short name of the message type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AuthAck => "auth_ack",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::Err { .. } => "err",
            ServerMessage::History { .. } => "history",
        }
    }
}

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The message type is not valid in the session's current state
    ProtocolMismatch,
    /// The destination identity is not currently connected
    PersonNotFound,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolMismatch => "protocol_mismatch",
            Self::PersonNotFound => "person_not_found",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
