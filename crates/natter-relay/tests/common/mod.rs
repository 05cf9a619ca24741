//! Test utilities for relay integration testing.
//!
//! Provides helpers for starting a relay on an ephemeral port and driving it
//! with typed or raw line-oriented clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use natter_relay::transport::DEFAULT_MAX_FRAME_BYTES;
use natter_relay::{
    ChatServer, ClientMessage, ConnectionRegistry, Identity, InitiatorTransport, MessageSink,
    MessageSource, MessageStore, RelayConfig, ServerMessage, TransportError,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing for tests (only once).
pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Test server handle.
///
/// The relay stops when the handle is dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn MessageStore>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a relay on an available port with default settings.
    pub async fn start() -> Self {
        Self::start_with_config(RelayConfig::default()).await
    }

    /// Start a relay with custom settings; the listen address is overridden.
    pub async fn start_with_config(config: RelayConfig) -> Self {
        let config = config.with_listen_addr(
            "127.0.0.1:0"
                .parse()
                .expect("Failed to parse test listen address"),
        );
        let server = ChatServer::bind(config)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to get local addr");
        let registry = Arc::clone(server.connection_registry());
        let store = Arc::clone(server.store());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = server.run(shutdown).await {
                    eprintln!("Test server error: {}", e);
                }
            }
        });

        Self {
            addr,
            registry,
            store,
            shutdown,
            task: Some(task),
        }
    }

    /// Stop the relay and wait for it to finish.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            timeout(DEFAULT_TIMEOUT, task)
                .await
                .expect("Test server did not stop in time")
                .expect("Test server task panicked");
        }
    }

    /// Wait until `identity` has (or no longer has) a registered session.
    pub async fn wait_for_connected(&self, identity: &str, connected: bool) {
        timeout(DEFAULT_TIMEOUT, async {
            while self.registry.is_connected(identity) != connected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for registry state");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Typed relay client for integration tests.
pub struct TestClient {
    transport: InitiatorTransport<TcpStream>,
}

impl TestClient {
    /// Connect to the server without logging in.
    pub async fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr)
            .await
            .expect("Failed to connect to test server");
        Self {
            transport: InitiatorTransport::new(stream, DEFAULT_MAX_FRAME_BYTES),
        }
    }

    /// Connect and log in as `username`, waiting for the ack.
    pub async fn login(server: &TestServer, username: &str) -> Self {
        let mut client = Self::connect(server).await;
        client.send_auth(username).await;
        assert_eq!(client.recv().await, ServerMessage::AuthAck);
        client
    }

    /// Send any client message.
    pub async fn send(&mut self, message: ClientMessage) {
        self.transport
            .send(message)
            .await
            .expect("Failed to send message");
    }

    /// Send a login message.
    pub async fn send_auth(&mut self, username: &str) {
        self.send(ClientMessage::Auth {
            username: Identity::from(username),
        })
        .await;
    }

    /// Send a chat message.
    pub async fn chat(&mut self, to: &str, content: &str) {
        self.send(ClientMessage::Chat {
            to: Identity::from(to),
            content: content.to_string(),
        })
        .await;
    }

    /// Receive the next server message, failing on timeout or transport error.
    pub async fn recv(&mut self) -> ServerMessage {
        self.try_recv()
            .await
            .expect("Transport error while receiving")
    }

    /// Receive the next server message, returning transport errors.
    pub async fn try_recv(&mut self) -> Result<ServerMessage, TransportError> {
        timeout(DEFAULT_TIMEOUT, self.transport.receive())
            .await
            .expect("Timed out waiting for server message")
    }

    /// Assert that the server closes the connection next.
    pub async fn expect_closed(&mut self) {
        match self.try_recv().await {
            Err(TransportError::Closed) | Err(TransportError::Io(_)) => {}
            other => panic!("expected connection close, got {:?}", other),
        }
    }
}

/// Raw line-oriented client for wire format tests.
pub struct RawClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl RawClient {
    /// Connect to a server.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let (read, writer) = TcpStream::connect(addr).await?.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    /// Send one line; the newline is appended.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Read one line with timeout. Returns `None` at end of stream.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = timeout(DEFAULT_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "Timeout"))??;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }
}
