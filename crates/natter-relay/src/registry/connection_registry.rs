//! Connection Registry implementation.
//!
//! Tracks authenticated sessions by identity for message routing.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::protocol::ServerMessage;
use crate::types::{Identity, SessionId};

/// An item on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Write this message to the peer
    Deliver(ServerMessage),
    /// Stop the delivery loop once everything queued before this is written
    Close,
}

/// Result of handing a message to a session's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Message was queued for delivery
    Queued,
    /// The session terminated before the message could be queued
    Closed,
}

/// Handle to a live session's outbound path.
///
/// Cloning the handle does not extend the session: once the session
/// terminates, its queue closes and its cancellation token fires, and every
/// clone starts reporting [`SendResult::Closed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle for the session `id`.
    pub fn new(id: SessionId, outbound: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            cancel,
        }
    }

    /// Identifier of the session behind this handle.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session has terminated.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }

    /// Queue a message for delivery.
    ///
    /// Waits while the queue is full. The wait ends early, without queuing,
    /// if the session terminates.
    pub async fn send(&self, message: ServerMessage) -> SendResult {
        self.enqueue(Outbound::Deliver(message)).await
    }

    /// Ask the delivery loop to stop after draining what is already queued.
    pub(crate) async fn close(&self) -> SendResult {
        self.enqueue(Outbound::Close).await
    }

    async fn enqueue(&self, item: Outbound) -> SendResult {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => SendResult::Closed,
            sent = self.outbound.send(item) => match sent {
                Ok(()) => SendResult::Queued,
                Err(_) => SendResult::Closed,
            },
        }
    }
}

/// Registry of authenticated sessions.
///
/// Thread-safe registry that maps identities to session handles.
/// Uses DashMap for concurrent access without explicit locking.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a session authenticates:
/// registry.register(identity.clone(), handle.clone());
///
/// // When routing a message:
/// if let Some(handle) = registry.lookup(&to) {
///     handle.send(message).await;
/// }
///
/// // When the session terminates:
/// registry.unregister(&identity, handle.id());
/// ```
pub struct ConnectionRegistry {
    connections: DashMap<Identity, SessionHandle>,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a session for an identity.
    ///
    /// If a session is already registered for the identity it is replaced.
    /// The old session is left running but no longer receives routed
    /// messages. Returns the replaced handle, if any.
    #[instrument(skip(self, handle), fields(identity = %identity, session = %handle.id()))]
    pub fn register(&self, identity: Identity, handle: SessionHandle) -> Option<SessionHandle> {
        let existing = self.connections.insert(identity, handle);
        match &existing {
            Some(old) => debug!(replaced = %old.id(), "Replaced existing registration"),
            None => debug!("Registered new session"),
        }
        existing
    }

    /// Look up the session currently registered for an identity.
    pub fn lookup(&self, identity: &str) -> Option<SessionHandle> {
        self.connections
            .get(identity)
            .map(|entry| entry.value().clone())
    }

    /// Unregister a session.
    ///
    /// The entry is only removed if it still belongs to `session`; a newer
    /// registration for the same identity is left alone. Returns true if an
    /// entry was removed.
    #[instrument(skip(self), fields(identity = %identity, session = %session))]
    pub fn unregister(&self, identity: &str, session: SessionId) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, handle| handle.id() == session)
            .is_some();
        if removed {
            debug!("Unregistered session");
        } else {
            debug!("Session was not the current registration");
        }
        removed
    }

    /// Check if an identity currently has a registered session.
    pub fn is_connected(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    /// Get the number of registered sessions.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// List all registered identities.
    ///
    /// Useful for debugging and monitoring.
    pub fn list_identities(&self) -> Vec<Identity> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
