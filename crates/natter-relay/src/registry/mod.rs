//! Connection Registry for real-time message routing.
//!
//! This module provides a thread-safe registry that tracks authenticated
//! sessions by identity, enabling the router to reach any online user.
//!
//! ## Architecture
//!
//! Each session registers a handle to its outbound queue once it has
//! authenticated. The router looks the handle up by identity and enqueues;
//! only the session's own delivery loop ever writes to its stream.
//!
//! ```text
//! ChatSession (alice) <-> ConnectionRegistry <-> ChatSession (bob)
//!        |                        |                     |
//!        v                        v                     v
//!  mpsc::Sender             DashMap<Identity,      mpsc::Sender
//!                            SessionHandle>
//! ```

mod connection_registry;

pub use connection_registry::{ConnectionRegistry, Outbound, SendResult, SessionHandle};
