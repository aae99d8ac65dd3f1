//! Realtime connector over WebSocket.

use async_stream::stream;
use courier_session_core::error::ConnectionError;
use courier_session_core::providers::{RealtimeConnector, RealtimeLink};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// [`RealtimeConnector`] that opens a WebSocket per connection.
///
/// Text frames carry the JSON channel messages. Binary frames are accepted
/// when they hold UTF-8; ping/pong is answered by the protocol layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RealtimeConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<RealtimeLink, ConnectionError> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, mut read) = socket.split();

        let sink = write
            .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|frame: String| futures::future::ready(Ok::<_, ConnectionError>(Message::Text(frame))));

        let frames = stream! {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => yield Ok(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => yield Ok(text),
                        Err(_) => tracing::warn!("Ignoring non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.into_owned())
                            .filter(|reason| !reason.is_empty());
                        yield Err(ConnectionError::ClosedByPeer(reason));
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                    Err(e) => {
                        yield Err(ConnectionError::Transport(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(RealtimeLink {
            sink: Box::pin(sink),
            stream: Box::pin(frames),
        })
    }
}
