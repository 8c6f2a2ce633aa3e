use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{Connector, FrameStream, WireMessage};
use crate::error::ConnectionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` / `wss://` endpoints with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<FrameStream, ConnectionError> {
        let (socket, response) =
            connect_async(url.as_str())
                .await
                .map_err(|err| ConnectionError::Connect {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
        debug!(url = %url, status = %response.status(), "websocket connected");
        Ok(Box::pin(stream::unfold(Some(socket), next_frame)))
    }
}

// Ping/pong replies are written by tungstenite while reading.
async fn next_frame(
    socket: Option<Socket>,
) -> Option<(Result<WireMessage, ConnectionError>, Option<Socket>)> {
    let mut socket = socket?;
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return Some((Ok(WireMessage::Text(text)), Some(socket)))
            }
            Some(Ok(Message::Binary(bytes))) => {
                return Some((Ok(WireMessage::Binary(bytes)), Some(socket)))
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty());
                return Some((Err(ConnectionError::Closed { reason }), None));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                return Some((Err(ConnectionError::Transport(err.to_string())), None))
            }
            None => return None,
        }
    }
}
