//! Framed message streams.
//!
//! A session only needs two capabilities from its stream: send one message and
//! receive one message. They are modelled as separate traits so that the
//! receive loop and the delivery loop can each own one half of the stream.
//!
//! The concrete wire format is newline-delimited JSON. The same generic
//! [`JsonLinesTransport`] serves both roles:
//!
//! - [`AcceptorTransport`]: relay side, receives [`ClientMessage`], sends [`ServerMessage`]
//! - [`InitiatorTransport`]: client side, receives [`ServerMessage`], sends [`ClientMessage`]

use std::marker::PhantomData;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Default upper bound for a single frame, in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Write side of a message stream.
#[async_trait]
pub trait MessageSink<M: Send + 'static>: Send {
    /// Write one message. Fails on any transport error.
    async fn send(&mut self, message: M) -> Result<(), TransportError>;

    /// Flush and shut down the write side.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Read side of a message stream.
#[async_trait]
pub trait MessageSource<M: Send + 'static>: Send {
    /// Read the next message. A closed stream is reported as
    /// [`TransportError::Closed`].
    async fn receive(&mut self) -> Result<M, TransportError>;
}

type LineFramed<S> = Framed<S, LinesCodec>;

/// Newline-delimited JSON transport over any byte stream.
pub struct JsonLinesTransport<S, In, Out> {
    framed: LineFramed<S>,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Relay side of a connection.
pub type AcceptorTransport<S> = JsonLinesTransport<S, ClientMessage, ServerMessage>;

/// Client side of a connection.
pub type InitiatorTransport<S> = JsonLinesTransport<S, ServerMessage, ClientMessage>;

impl<S, In, Out> JsonLinesTransport<S, In, Out>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a byte stream, rejecting frames longer than `max_frame_bytes`.
    pub fn new(stream: S, max_frame_bytes: usize) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(max_frame_bytes)),
            _marker: PhantomData,
        }
    }

    /// Split into independently owned write and read halves.
    pub fn split(self) -> (JsonLinesSink<S, Out>, JsonLinesSource<S, In>) {
        let (sink, stream) = self.framed.split();
        (
            JsonLinesSink {
                inner: sink,
                _marker: PhantomData,
            },
            JsonLinesSource {
                inner: stream,
                _marker: PhantomData,
            },
        )
    }
}

/// Write half of a [`JsonLinesTransport`].
pub struct JsonLinesSink<S, Out> {
    inner: SplitSink<LineFramed<S>, String>,
    _marker: PhantomData<fn(Out)>,
}

/// Read half of a [`JsonLinesTransport`].
pub struct JsonLinesSource<S, In> {
    inner: SplitStream<LineFramed<S>>,
    _marker: PhantomData<fn() -> In>,
}

fn encode<M: Serialize>(message: &M) -> Result<String, TransportError> {
    Ok(serde_json::to_string(message)?)
}

async fn next_message<St, M>(stream: &mut St) -> Result<M, TransportError>
where
    St: futures::Stream<Item = Result<String, tokio_util::codec::LinesCodecError>> + Unpin,
    M: DeserializeOwned,
{
    loop {
        match stream.next().await {
            // Blank lines are keep-alives.
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => return Ok(serde_json::from_str(&line)?),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl<S, In, Out> MessageSink<Out> for JsonLinesTransport<S, In, Out>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    In: Send + 'static,
    Out: Serialize + Send + 'static,
{
    async fn send(&mut self, message: Out) -> Result<(), TransportError> {
        let line = encode(&message)?;
        self.framed.send(line).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::<String>::close(&mut self.framed).await?;
        Ok(())
    }
}

#[async_trait]
impl<S, In, Out> MessageSource<In> for JsonLinesTransport<S, In, Out>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    In: DeserializeOwned + Send + 'static,
    Out: Send + 'static,
{
    async fn receive(&mut self) -> Result<In, TransportError> {
        next_message(&mut self.framed).await
    }
}

#[async_trait]
impl<S, Out> MessageSink<Out> for JsonLinesSink<S, Out>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    Out: Serialize + Send + 'static,
{
    async fn send(&mut self, message: Out) -> Result<(), TransportError> {
        let line = encode(&message)?;
        self.inner.send(line).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await?;
        Ok(())
    }
}

#[async_trait]
impl<S, In> MessageSource<In> for JsonLinesSource<S, In>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    In: DeserializeOwned + Send + 'static,
{
    async fn receive(&mut self) -> Result<In, TransportError> {
        next_message(&mut self.inner).await
    }
}
