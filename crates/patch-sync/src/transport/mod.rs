//! Streaming transports.
//!
//! A [`Connector`] dials one URL and hands back a [`FrameStream`] of raw wire
//! messages. [`spawn_pump`] forwards a stream into the subscription's event
//! channel, tagging every event with the [`ConnectionId`] it came from so
//! frames from a superseded connection can be told apart.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use url::Url;

use crate::error::{ConnectionError, DecodeError, DecodeErrorKind};

pub mod channel;
pub mod websocket;

pub use channel::{ChannelAcceptor, ChannelConnector, ChannelPeer};
pub use websocket::WebSocketConnector;

/// One inbound message as the transport delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Frame text. Binary payloads must be valid UTF-8.
    pub fn into_text(self) -> Result<String, DecodeError> {
        match self {
            WireMessage::Text(text) => Ok(text),
            WireMessage::Binary(bytes) => String::from_utf8(bytes).map_err(|err| {
                let raw = String::from_utf8_lossy(err.as_bytes()).into_owned();
                DecodeError {
                    kind: DecodeErrorKind::InvalidUtf8(err.utf8_error().to_string()),
                    raw,
                }
            }),
        }
    }
}

impl From<String> for WireMessage {
    fn from(text: String) -> Self {
        WireMessage::Text(text)
    }
}

impl From<&str> for WireMessage {
    fn from(text: &str) -> Self {
        WireMessage::Text(text.to_string())
    }
}

/// Raw inbound messages. A peer close is reported as
/// `Err(ConnectionError::Closed { .. })`; the stream ends after its first error.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireMessage, ConnectionError>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Completes once the handshake succeeded.
    async fn connect(&self, url: &Url) -> Result<FrameStream, ConnectionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    /// A message that never made it to the decoder. The connection stays up.
    Malformed(DecodeError),
    Closed(Option<String>),
    Failed(ConnectionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// Owns a running pump. Dropping it aborts the pump, which drops the stream
/// and closes the underlying connection.
#[derive(Debug)]
pub struct PumpHandle {
    task: JoinHandle<()>,
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Forwards every frame of `stream`, then exactly one terminal event.
pub fn spawn_pump(
    id: ConnectionId,
    mut stream: FrameStream,
    sink: mpsc::UnboundedSender<Tagged>,
) -> PumpHandle {
    let task = tokio::spawn(async move {
        let terminal = loop {
            match stream.next().await {
                Some(Ok(message)) => {
                    let event = match message.into_text() {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(err) => TransportEvent::Malformed(err),
                    };
                    let tagged = Tagged {
                        connection: id,
                        event,
                    };
                    if sink.send(tagged).is_err() {
                        return;
                    }
                }
                Some(Err(ConnectionError::Closed { reason })) => {
                    break TransportEvent::Closed(reason)
                }
                Some(Err(err)) => break TransportEvent::Failed(err),
                None => break TransportEvent::Closed(None),
            }
        };
        trace!(connection_id = %id, event = ?terminal, "pump finished");
        let _ = sink.send(Tagged {
            connection: id,
            event: terminal,
        });
    });
    PumpHandle { task }
}
