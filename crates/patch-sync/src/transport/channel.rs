//! In-memory transport. The test side holds a [`ChannelAcceptor`] and plays
//! the server through the [`ChannelPeer`] each connect attempt produces.

use std::future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, FrameStream, WireMessage};
use crate::error::ConnectionError;

type Outbound = mpsc::UnboundedSender<Result<WireMessage, ConnectionError>>;

#[derive(Debug)]
struct Shared {
    accepted: mpsc::UnboundedSender<ChannelPeer>,
    refuse: AtomicU32,
    stall: AtomicU32,
    attempts: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct ChannelConnector {
    shared: Arc<Shared>,
}

#[derive(Debug)]
pub struct ChannelAcceptor {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedReceiver<ChannelPeer>,
}

/// Server end of one in-memory connection.
#[derive(Debug)]
pub struct ChannelPeer {
    url: Url,
    tx: Outbound,
}

pub fn channel() -> (ChannelConnector, ChannelAcceptor) {
    let (accepted, incoming) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        accepted,
        refuse: AtomicU32::new(0),
        stall: AtomicU32::new(0),
        attempts: AtomicU64::new(0),
    });
    (
        ChannelConnector {
            shared: shared.clone(),
        },
        ChannelAcceptor { shared, incoming },
    )
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, url: &Url) -> Result<FrameStream, ConnectionError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.shared.refuse) {
            return Err(ConnectionError::Connect {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }
        if take_one(&self.shared.stall) {
            future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = ChannelPeer {
            url: url.clone(),
            tx,
        };
        self.shared
            .accepted
            .send(peer)
            .map_err(|_| ConnectionError::Connect {
                url: url.to_string(),
                reason: "acceptor dropped".into(),
            })?;
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

impl ChannelAcceptor {
    /// Waits for the next successful connect.
    pub async fn accept(&mut self) -> Option<ChannelPeer> {
        self.incoming.recv().await
    }

    pub fn try_accept(&mut self) -> Option<ChannelPeer> {
        self.incoming.try_recv().ok()
    }

    /// Makes the next `n` connect attempts fail immediately.
    pub fn refuse_next(&self, n: u32) {
        self.shared.refuse.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` connect attempts hang until cancelled.
    pub fn stall_next(&self, n: u32) {
        self.shared.stall.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

impl ChannelPeer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns false once the client side is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.tx.send(Ok(WireMessage::Text(frame.into()))).is_ok()
    }

    pub fn send_binary(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Ok(WireMessage::Binary(payload.into()))).is_ok()
    }

    pub fn close(self) {
        drop(self);
    }

    pub fn close_with(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(ConnectionError::Closed {
            reason: Some(reason.into()),
        }));
    }

    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(ConnectionError::Transport(message.into())));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the client dropped its end of the connection.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn frames_flow_from_peer_to_stream() {
        let (connector, mut acceptor) = channel();
        let url = Url::parse("ws://test/stream").unwrap();
        let mut frames = connector.connect(&url).await.expect("connect");
        let peer = acceptor.accept().await.expect("peer");
        assert_eq!(peer.url(), &url);

        assert!(peer.send("one"));
        assert!(peer.send_binary(b"two".to_vec()));
        peer.close_with("done");
        assert_eq!(frames.next().await, Some(Ok(WireMessage::Text("one".into()))));
        assert_eq!(
            frames.next().await,
            Some(Ok(WireMessage::Binary(b"two".to_vec())))
        );
        assert_eq!(
            frames.next().await,
            Some(Err(ConnectionError::Closed {
                reason: Some("done".into())
            }))
        );
        assert_eq!(frames.next().await, None);
    }

    #[tokio::test]
    async fn refused_attempts_are_counted() {
        let (connector, mut acceptor) = channel();
        let url = Url::parse("ws://test/stream").unwrap();
        acceptor.refuse_next(2);
        assert!(connector.connect(&url).await.is_err());
        assert!(connector.connect(&url).await.is_err());
        assert!(connector.connect(&url).await.is_ok());
        assert_eq!(acceptor.connect_attempts(), 3);
        assert!(acceptor.try_accept().is_some());
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_peer() {
        let (connector, mut acceptor) = channel();
        let url = Url::parse("ws://test/stream").unwrap();
        let frames = connector.connect(&url).await.expect("connect");
        let peer = acceptor.accept().await.expect("peer");
        assert!(!peer.is_closed());
        drop(frames);
        peer.closed().await;
        assert!(!peer.send("late"));
    }
}
