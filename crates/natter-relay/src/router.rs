//! Message routing between sessions.
//!
//! The `Router` records every chat message in the store and then hands it to
//! the recipient's outbound queue.
//!
//! # Routing Logic
//!
//! For each chat message, the router:
//! 1. Appends it to the sender's and the recipient's logs
//! 2. Looks the recipient up in the `ConnectionRegistry`
//! 3. If offline: queues `Err(PersonNotFound)` back to the sender
//! 4. If online: queues `Chat{from, content}` on the recipient's session,
//!    waiting while that queue is full
//!
//! The router never touches a stream directly; a slow recipient only ever
//! stalls the sender that is waiting on its queue.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::RelayError;
use crate::metrics;
use crate::protocol::{ErrorCode, ServerMessage};
use crate::registry::{ConnectionRegistry, SendResult, SessionHandle};
use crate::store::MessageStore;
use crate::types::Identity;

/// Outcome of a delivery attempt.
///
/// In every case the message has already been recorded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the recipient's session
    Delivered {
        /// Sequence number in the sender's log
        from_seq: u64,
        /// Sequence number in the recipient's log
        to_seq: u64,
    },
    /// Recipient not registered; the sender was sent `PersonNotFound`
    RecipientOffline,
    /// Recipient terminated while the message was waiting for queue space
    RecipientGone,
}

/// Routes chat messages between registered sessions.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
}

impl Router {
    /// Create a new router over a registry and a message store.
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        info!("Router initialized");
        Self { registry, store }
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Record and deliver one chat message.
    ///
    /// `sender` is the outbound handle of the session the message came from;
    /// routing errors are reported through it. A missing recipient is not an
    /// error for the sender's session. Only store failures are returned as
    /// `Err`.
    #[instrument(skip(self, sender, content), fields(from = %from, to = %to))]
    pub async fn deliver(
        &self,
        sender: &SessionHandle,
        from: &Identity,
        to: &Identity,
        content: String,
    ) -> Result<DeliveryOutcome, RelayError> {
        let (from_seq, to_seq) = self.store.append(from, to, &content).await?;

        let Some(recipient) = self.registry.lookup(to.as_str()) else {
            debug!("Recipient not connected");
            metrics::record_message_routed("not_found");
            let notice = ServerMessage::error(
                ErrorCode::PersonNotFound,
                format!("{} is not online", to),
            );
            if sender.send(notice).await == SendResult::Closed {
                debug!("Sender closed before the not-found notice was queued");
            }
            return Ok(DeliveryOutcome::RecipientOffline);
        };

        let message = ServerMessage::Chat {
            from: from.clone(),
            content,
        };
        match recipient.send(message).await {
            SendResult::Queued => {
                debug!(from_seq, to_seq, "Message queued for delivery");
                metrics::record_message_routed("delivered");
                Ok(DeliveryOutcome::Delivered { from_seq, to_seq })
            }
            SendResult::Closed => {
                warn!("Recipient session closed before delivery, message kept in store");
                metrics::record_message_routed("recipient_gone");
                Ok(DeliveryOutcome::RecipientGone)
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
