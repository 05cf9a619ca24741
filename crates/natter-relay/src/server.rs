//! Chat relay server.
//!
//! Listens on a TCP port and runs one [`ChatSession`] per accepted
//! connection, all sharing a single [`Router`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::session::ChatSession;
use crate::store::{InMemoryMessageStore, MessageStore};
use crate::transport::AcceptorTransport;

/// How long shutdown waits for sessions to unwind.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat relay server instance.
pub struct ChatServer {
    config: RelayConfig,
    listener: TcpListener,
    router: Arc<Router>,
}

impl ChatServer {
    /// Bind the listener with an in-memory message store.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        Self::bind_with_store(config, Arc::new(InMemoryMessageStore::new())).await
    }

    /// Bind the listener with the given message store.
    pub async fn bind_with_store(
        config: RelayConfig,
        store: Arc<dyn MessageStore>,
    ) -> Result<Self, RelayError> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(Router::new(registry, store));

        info!(addr = %listener.local_addr()?, "Chat relay listening");

        Ok(Self {
            config,
            listener,
            router,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Every session runs under a child of `shutdown`, so cancelling it also
    /// terminates all live sessions. Returns once they have unwound.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RelayError> {
        let mut sessions = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Session task failed");
                    }
                    continue;
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let session = ChatSession::new(
                Arc::clone(&self.router),
                self.config.outbound_capacity,
                shutdown.child_token(),
            );
            let session_id = session.id();
            let max_frame_bytes = self.config.max_frame_bytes;

            sessions.spawn(
                serve_connection(session, stream, max_frame_bytes).instrument(info_span!(
                    "natter.connection.lifecycle",
                    peer = %peer_addr,
                    session = %session_id,
                )),
            );
        }

        info!(sessions = sessions.len(), "Shutting down chat relay");

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Session task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = sessions.len(), "Sessions did not stop in time, aborting");
            sessions.shutdown().await;
        }

        info!("Chat relay stopped");
        Ok(())
    }

    /// Get the server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get the router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Get the connection registry.
    pub fn connection_registry(&self) -> &Arc<ConnectionRegistry> {
        self.router.registry()
    }

    /// Get the message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        self.router.store()
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

async fn serve_connection(mut session: ChatSession, stream: TcpStream, max_frame_bytes: usize) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (sink, source) = AcceptorTransport::new(stream, max_frame_bytes).split();
    if let Err(e) = session.run(sink, source).await {
        warn!(error = %e, "Session error");
    }
}
