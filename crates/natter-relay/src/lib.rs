//! # natter-relay
//!
//! Real-time chat relay: clients log in with a username, send direct
//! messages to other users, and receive messages addressed to them.
//!
//! ## Architecture
//!
//! - **Server**: TCP listener, one task per connection
//! - **Sessions**: per-connection state machine with a receive loop and a
//!   delivery loop joined by a bounded outbound queue
//! - **Registry**: identity → live session, last login wins
//! - **Router**: records each message, then hands it to the recipient
//! - **Store**: per-identity, append-only, sequence-numbered message logs
//!
//! ## Wire Format
//!
//! Newline-delimited JSON, one message per line, tagged by a `type` field:
//!
//! ```text
//! → {"type":"auth","username":"alice"}
//! ← {"type":"auth_ack"}
//! → {"type":"chat","to":"bob","content":"hi"}
//! ← {"type":"err","code":"person_not_found","message":"bob is not online"}
//! ```

pub mod config;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

mod error;
mod types;

pub use config::RelayConfig;
pub use error::{RelayError, StoreError, TransportError};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use registry::{ConnectionRegistry, SendResult, SessionHandle};
pub use router::{DeliveryOutcome, Router};
pub use server::ChatServer;
pub use session::ChatSession;
pub use store::{InMemoryMessageStore, MessageStore, StoredMessage};
pub use transport::{AcceptorTransport, InitiatorTransport, MessageSink, MessageSource};
pub use types::*;
