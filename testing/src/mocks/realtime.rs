//! Scripted realtime connector.
//!
//! Every accepted connection produces a [`ServerHandle`] that plays the
//! server side: push frames to the client, read what the client sent, fail
//! or close the socket.

use courier_session_core::error::ConnectionError;
use courier_session_core::message::ChannelMessage;
use courier_session_core::providers::{RealtimeConnector, RealtimeLink};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What the next `connect` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Complete the handshake (the default).
    Accept,
    /// Fail the handshake with the given reason.
    Reject(String),
}

/// Server side of one mock connection.
#[derive(Clone)]
pub struct ServerHandle {
    url: String,
    to_client: mpsc::UnboundedSender<Result<String, ConnectionError>>,
    from_client: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle").field("url", &self.url).finish()
    }
}

impl ServerHandle {
    /// URL the client connected with.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a channel message to the client.
    pub fn push(&self, message: &ChannelMessage) {
        match serde_json::to_string(message) {
            Ok(frame) => self.push_raw(frame),
            Err(e) => tracing::warn!(error = %e, "mock realtime: could not serialize message"),
        }
    }

    /// Push an arbitrary text frame to the client.
    pub fn push_raw(&self, frame: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(frame.into()));
    }

    /// Fail the connection with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(ConnectionError::Transport(reason.to_string())));
        self.to_client.close_channel();
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        self.to_client.close_channel();
    }

    /// `true` once the connection is closed from either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }

    /// Next frame the client sent, or `None` once the client closed its sink.
    pub async fn next_outbound(&self) -> Option<String> {
        self.from_client.lock().await.next().await
    }

    /// Next frame the client sent, decoded.
    pub async fn next_outbound_message(&self) -> Option<ChannelMessage> {
        let frame = self.next_outbound().await?;
        serde_json::from_str(&frame).ok()
    }
}

#[derive(Default)]
struct ConnectorState {
    urls: Vec<String>,
    script: VecDeque<ConnectOutcome>,
    connections: Vec<ServerHandle>,
}

/// Scripted [`RealtimeConnector`].
///
/// Records every URL it is asked to connect to. Handshakes succeed unless an
/// outcome was scripted with [`script`](Self::script).
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    accepted_tx: tokio::sync::mpsc::UnboundedSender<ServerHandle>,
    accepted_rx: Arc<tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<ServerHandle>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Create a connector that accepts every connection.
    #[must_use]
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            accepted_tx,
            accepted_rx: Arc::new(tokio::sync::Mutex::new(accepted_rx)),
        }
    }

    /// Queue an outcome for a future `connect` call. Outcomes are consumed in order.
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn script(&self, outcome: ConnectOutcome) {
        self.state.lock().unwrap().script.push_back(outcome);
    }

    /// Every URL passed to `connect`, in call order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    /// Number of `connect` calls, accepted or not.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    /// Most recently accepted connection.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn latest(&self) -> Option<ServerHandle> {
        self.state.lock().unwrap().connections.last().cloned()
    }

    /// Wait for the next accepted connection.
    ///
    /// # Panics
    ///
    /// Panics if the connector was dropped, which cannot happen while `self`
    /// is alive.
    #[allow(clippy::expect_used)]
    pub async fn next_connection(&self) -> ServerHandle {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector holds the sender")
    }
}

impl RealtimeConnector for MockConnector {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn connect(&self, url: &str) -> Result<RealtimeLink, ConnectionError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.urls.push(url.to_string());
            state.script.pop_front().unwrap_or(ConnectOutcome::Accept)
        };

        if let ConnectOutcome::Reject(reason) = outcome {
            return Err(ConnectionError::Handshake(reason));
        }

        let (to_client, client_stream) = mpsc::unbounded();
        let (client_sink, from_client) = mpsc::unbounded::<String>();

        let handle = ServerHandle {
            url: url.to_string(),
            to_client,
            from_client: Arc::new(tokio::sync::Mutex::new(from_client)),
        };
        self.state.lock().unwrap().connections.push(handle.clone());
        let _ = self.accepted_tx.send(handle);

        Ok(RealtimeLink {
            sink: Box::pin(
                client_sink.sink_map_err(|e| ConnectionError::Transport(e.to_string())),
            ),
            stream: Box::pin(client_stream),
        })
    }
}
