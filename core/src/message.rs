//! Realtime frame envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A realtime frame: `{"type": <channel>, "data": <payload>}`.
///
/// `type` doubles as the channel name on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Channel name.
    #[serde(rename = "type")]
    pub channel: String,

    /// Payload; `null` when the frame has none.
    #[serde(default)]
    pub data: Value,
}

impl ChannelMessage {
    /// Build a frame.
    #[must_use]
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }
}
