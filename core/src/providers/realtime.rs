//! Realtime transport trait.

use futures::{Sink, Stream};
use std::pin::Pin;

use crate::error::ConnectionError;

/// Send half of a realtime connection. Items are serialized text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Receive half of a realtime connection.
///
/// The stream ends when the connection is closed; an `Err` item means the
/// connection failed and no further items follow.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

/// An established connection, already split for concurrent send and receive.
pub struct RealtimeLink {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl std::fmt::Debug for RealtimeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RealtimeLink(<sink>, <stream>)")
    }
}

/// Opens realtime connections.
///
/// The URL already carries the user id and access token; implementations
/// must not cache it between calls.
pub trait RealtimeConnector: Send + Sync + 'static {
    /// Open a connection and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Handshake`] if the connection cannot be
    /// established.
    fn connect(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<RealtimeLink, ConnectionError>> + Send;
}
