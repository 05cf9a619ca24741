//! Per-connection session state machine.
//!
//! A session moves through `Unauthenticated → Authenticated → Terminated`.
//! Once authenticated it runs two loops:
//!
//! - the receive loop (the session's own task) reads client messages and
//!   hands chat messages to the [`Router`]
//! - the delivery loop (a spawned task) drains the bounded outbound queue
//!   and is the only writer to the stream
//!
//! Both loops share one cancellation token. Whichever loop fails first fires
//! it, the other unwinds, and the session unregisters itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::error::{RelayError, TransportError};
use crate::metrics;
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::registry::{Outbound, SendResult, SessionHandle};
use crate::router::Router;
use crate::transport::{MessageSink, MessageSource};
use crate::types::{Identity, SessionId, SessionState};

/// How long a terminating session waits for its final error to be written.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the receive loop stopped.
enum LoopExit {
    /// Read failure or peer disconnect
    Failed(RelayError),
    /// Protocol violation; the error is already queued for the peer
    Protocol(RelayError),
    /// The session's token fired (delivery failure or shutdown)
    Cancelled,
}

/// State machine driving one client connection.
pub struct ChatSession {
    id: SessionId,
    state: SessionState,
    identity: Option<Identity>,
    router: Arc<Router>,
    outbound_capacity: usize,
    cancel: CancellationToken,
}

impl ChatSession {
    /// Create a session for a freshly accepted stream.
    ///
    /// `cancel` is the session's own token; pass a child of a server-wide
    /// token to have the session stop on shutdown.
    pub fn new(router: Arc<Router>, outbound_capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            id: SessionId::next(),
            state: SessionState::Unauthenticated,
            identity: None,
            router,
            outbound_capacity: outbound_capacity.max(1),
            cancel,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound identity, once authenticated.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Drive the session until it terminates.
    ///
    /// Returns `Ok(())` when the peer disconnects or the session is
    /// cancelled, and an error for protocol violations and transport
    /// failures. A terminated session cannot be run again.
    #[instrument(
        name = "natter.session",
        skip_all,
        fields(session = %self.id, identity = tracing::field::Empty)
    )]
    pub async fn run<Tx, Rx>(&mut self, mut sink: Tx, mut source: Rx) -> Result<(), RelayError>
    where
        Tx: MessageSink<ServerMessage> + 'static,
        Rx: MessageSource<ClientMessage>,
    {
        if self.state != SessionState::Unauthenticated {
            return Err(RelayError::internal(format!(
                "session {} already {}",
                self.id, self.state
            )));
        }

        let identity = match self.authenticate(&mut sink, &mut source).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                self.finish("shutdown");
                return Ok(());
            }
            Err(e) => {
                self.finish(termination_reason(&e));
                return swallow_disconnect(e);
            }
        };

        let registry = Arc::clone(self.router.registry());
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let handle = SessionHandle::new(self.id, outbound_tx, self.cancel.clone());

        registry.register(identity.clone(), handle.clone());
        metrics::record_sessions_active(registry.connection_count());
        tracing::Span::current().record("identity", identity.as_str());

        if let Err(e) = sink.send(ServerMessage::AuthAck).await {
            self.cancel.cancel();
            registry.unregister(identity.as_str(), self.id);
            metrics::record_sessions_active(registry.connection_count());
            let e = RelayError::from(e);
            self.finish(termination_reason(&e));
            return swallow_disconnect(e);
        }

        self.identity = Some(identity.clone());
        self.state = SessionState::Authenticated;
        info!(identity = %identity, "Session authenticated");

        let delivery =
            tokio::spawn(delivery_loop(sink, outbound_rx, self.cancel.clone()).in_current_span());

        let exit = self.receive_loop(&identity, &handle, &mut source).await;

        // No new messages may route here from this point on.
        registry.unregister(identity.as_str(), self.id);
        metrics::record_sessions_active(registry.connection_count());

        let delivery_result = match &exit {
            LoopExit::Protocol(_) => {
                let flush = async {
                    handle.close().await;
                    delivery.await
                };
                let joined = tokio::time::timeout(FLUSH_TIMEOUT, flush).await;
                self.cancel.cancel();
                match joined {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        warn!("Timed out flushing protocol error");
                        None
                    }
                }
            }
            LoopExit::Failed(_) | LoopExit::Cancelled => {
                self.cancel.cancel();
                Some(delivery.await)
            }
        };

        let delivery_error = match delivery_result {
            Some(Ok(Ok(()))) | None => None,
            Some(Ok(Err(e))) => Some(RelayError::from(e)),
            Some(Err(e)) => Some(RelayError::internal(format!("delivery task failed: {}", e))),
        };

        let result = match exit {
            LoopExit::Failed(e) | LoopExit::Protocol(e) => Err(e),
            LoopExit::Cancelled => match delivery_error {
                Some(e) => Err(e),
                None => Ok(()),
            },
        };

        match &result {
            Ok(()) => self.finish("shutdown"),
            Err(e) => self.finish(termination_reason(e)),
        }
        swallow_result(result)
    }

    /// Wait for the login message.
    ///
    /// Returns `Ok(None)` if the session is cancelled first.
    async fn authenticate<Tx, Rx>(
        &mut self,
        sink: &mut Tx,
        source: &mut Rx,
    ) -> Result<Option<Identity>, RelayError>
    where
        Tx: MessageSink<ServerMessage>,
        Rx: MessageSource<ClientMessage>,
    {
        let message = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            message = source.receive() => message?,
        };

        let reason = match message {
            ClientMessage::Auth { username } if !username.is_blank() => {
                metrics::record_auth_attempt(true);
                return Ok(Some(username));
            }
            ClientMessage::Auth { .. } => "username must not be empty".to_string(),
            ClientMessage::Unknown => "expected auth, got an unsupported message type".to_string(),
            other => format!("expected auth, got {}", other.kind()),
        };

        metrics::record_auth_attempt(false);
        debug!(reason = %reason, "Rejecting unauthenticated message");
        sink.send(ServerMessage::error(ErrorCode::ProtocolMismatch, reason.clone()))
            .await?;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Failed to close stream after protocol error");
        }
        Err(RelayError::protocol(reason))
    }

    async fn receive_loop<Rx>(
        &self,
        identity: &Identity,
        handle: &SessionHandle,
        source: &mut Rx,
    ) -> LoopExit
    where
        Rx: MessageSource<ClientMessage>,
    {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                message = source.receive() => match message {
                    Ok(message) => message,
                    Err(e) => return LoopExit::Failed(e.into()),
                },
            };

            let handled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                handled = self.handle_message(identity, handle, message) => handled,
            };

            match handled {
                Ok(()) => {}
                Err(e @ RelayError::Protocol(_)) => return LoopExit::Protocol(e),
                Err(e) => return LoopExit::Failed(e),
            }
        }
    }

    async fn handle_message(
        &self,
        identity: &Identity,
        handle: &SessionHandle,
        message: ClientMessage,
    ) -> Result<(), RelayError> {
        let message_kind = message.kind();
        match message {
            ClientMessage::Chat { to, content } => {
                let outcome = self.router.deliver(handle, identity, &to, content).await?;
                debug!(to = %to, ?outcome, "Chat handled");
                Ok(())
            }
            ClientMessage::History { since_seq } => {
                let messages = self.router.store().query(identity, since_seq).await?;
                debug!(since_seq, count = messages.len(), "Replaying history");
                if handle.send(ServerMessage::History { messages }).await == SendResult::Closed {
                    debug!("Session closed before history reply was queued");
                }
                Ok(())
            }
            ClientMessage::Auth { .. } | ClientMessage::Unknown => {
                let reason = match message_kind {
                    "auth" => "already authenticated",
                    _ => "unsupported message type",
                };
                if handle
                    .send(ServerMessage::error(ErrorCode::ProtocolMismatch, reason))
                    .await
                    == SendResult::Closed
                {
                    debug!("Session closed before protocol error was queued");
                }
                Err(RelayError::protocol(reason))
            }
        }
    }

    fn finish(&mut self, reason: &'static str) {
        self.state = SessionState::Terminated;
        metrics::record_session_terminated(reason);
        info!(reason, "Session terminated");
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Drain the outbound queue into the stream in FIFO order.
///
/// Stops on cancellation, on an [`Outbound::Close`] marker, or on the first
/// write failure, in which case it fires `cancel` so the receive loop stops
/// too.
async fn delivery_loop<Tx>(
    mut sink: Tx,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) -> Result<(), TransportError>
where
    Tx: MessageSink<ServerMessage>,
{
    let result = loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            item = outbound.recv() => item,
        };

        let message = match item {
            Some(Outbound::Deliver(message)) => message,
            Some(Outbound::Close) | None => break Ok(()),
        };

        let kind = message.kind();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            sent = sink.send(message) => {
                if let Err(e) = sent {
                    break Err(e);
                }
            }
        }
        debug!(kind, "Delivered message");
    };

    match &result {
        Err(e) => {
            warn!(error = %e, "Delivery failed, terminating session");
            cancel.cancel();
        }
        Ok(()) => match tokio::time::timeout(FLUSH_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Failed to close stream"),
            Err(_) => debug!("Timed out closing stream"),
        },
    }

    // Wake any producer still waiting for queue space.
    outbound.close();
    result
}

fn termination_reason(err: &RelayError) -> &'static str {
    match err {
        RelayError::Transport(TransportError::Closed) => "disconnect",
        RelayError::Transport(_) | RelayError::Io(_) => "transport",
        RelayError::Protocol(_) => "protocol",
        RelayError::Store(_) | RelayError::Config(_) | RelayError::Internal(_) => "internal",
    }
}

fn swallow_disconnect(err: RelayError) -> Result<(), RelayError> {
    if err.is_disconnect() {
        Ok(())
    } else {
        Err(err)
    }
}

fn swallow_result(result: Result<(), RelayError>) -> Result<(), RelayError> {
    result.or_else(swallow_disconnect)
}
