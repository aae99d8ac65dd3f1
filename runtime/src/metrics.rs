//! Metrics for the session manager.
//!
//! Everything is recorded through the [`metrics`] facade; the application
//! decides whether and where to export it by installing a recorder. Without
//! one, recording is a no-op.
//!
//! Call [`describe_metrics`] once after installing a recorder to attach
//! descriptions.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric names.
pub mod names {
    /// Refresh exchanges started.
    pub const REFRESH_STARTED: &str = "session.refresh.started";
    /// Refresh exchanges that produced a new token pair.
    pub const REFRESH_SUCCEEDED: &str = "session.refresh.succeeded";
    /// Refresh exchanges that failed without expiring the session.
    pub const REFRESH_FAILED: &str = "session.refresh.failed";
    /// Sessions invalidated by the system.
    pub const SESSION_EXPIRED: &str = "session.expired";
    /// Realtime connection attempts.
    pub const CONNECT_ATTEMPTS: &str = "realtime.connect.attempts";
    /// Realtime connections that completed the handshake.
    pub const CONNECT_OPENED: &str = "realtime.connect.opened";
    /// Reconnects scheduled after a failure.
    pub const RECONNECT_SCHEDULED: &str = "realtime.reconnect.scheduled";
    /// Inbound messages delivered to subscriber callbacks.
    pub const MESSAGES_DISPATCHED: &str = "realtime.messages.dispatched";
    /// Outbound messages dropped because the connection was not open.
    pub const MESSAGES_DROPPED: &str = "realtime.messages.dropped";
    /// 1 while the realtime connection is open, else 0.
    pub const CONNECTED: &str = "realtime.connected";
}

/// Register descriptions for every metric.
pub fn describe_metrics() {
    describe_counter!(names::REFRESH_STARTED, "Total number of refresh exchanges started");
    describe_counter!(
        names::REFRESH_SUCCEEDED,
        "Total number of refresh exchanges that issued a new token pair"
    );
    describe_counter!(
        names::REFRESH_FAILED,
        "Total number of refresh exchanges that failed without expiring the session"
    );
    describe_counter!(
        names::SESSION_EXPIRED,
        "Total number of sessions invalidated by the system"
    );

    describe_counter!(names::CONNECT_ATTEMPTS, "Total number of realtime connection attempts");
    describe_counter!(
        names::CONNECT_OPENED,
        "Total number of realtime connections that completed the handshake"
    );
    describe_counter!(
        names::RECONNECT_SCHEDULED,
        "Total number of reconnects scheduled after a connection failure"
    );
    describe_counter!(
        names::MESSAGES_DISPATCHED,
        "Total number of inbound messages delivered to subscribers"
    );
    describe_counter!(
        names::MESSAGES_DROPPED,
        "Total number of outbound messages dropped while not connected"
    );
    describe_gauge!(names::CONNECTED, "Realtime connection state (0 = down, 1 = open)");
}

/// Token lifecycle metrics recorder.
pub struct SessionMetrics;

impl SessionMetrics {
    /// Record a refresh exchange starting.
    pub fn record_refresh_started() {
        counter!(names::REFRESH_STARTED).increment(1);
    }

    /// Record a successful refresh.
    pub fn record_refresh_succeeded() {
        counter!(names::REFRESH_SUCCEEDED).increment(1);
    }

    /// Record a refresh failure that left the session in place.
    pub fn record_refresh_failed() {
        counter!(names::REFRESH_FAILED).increment(1);
    }

    /// Record a session expiry.
    pub fn record_expired() {
        counter!(names::SESSION_EXPIRED).increment(1);
    }
}

/// Realtime metrics recorder.
pub struct RealtimeMetrics;

impl RealtimeMetrics {
    /// Record a connection attempt.
    pub fn record_attempt() {
        counter!(names::CONNECT_ATTEMPTS).increment(1);
    }

    /// Record a completed handshake.
    pub fn record_opened() {
        counter!(names::CONNECT_OPENED).increment(1);
    }

    /// Record a scheduled reconnect.
    pub fn record_reconnect_scheduled() {
        counter!(names::RECONNECT_SCHEDULED).increment(1);
    }

    /// Record callbacks invoked for one inbound message.
    pub fn record_dispatched(callbacks: usize) {
        counter!(names::MESSAGES_DISPATCHED).increment(callbacks as u64);
    }

    /// Record an outbound message dropped.
    pub fn record_dropped() {
        counter!(names::MESSAGES_DROPPED).increment(1);
    }

    /// Record the connection state.
    pub fn record_connected(connected: bool) {
        gauge!(names::CONNECTED).set(if connected { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        SessionMetrics::record_refresh_started();
        SessionMetrics::record_expired();
        RealtimeMetrics::record_dispatched(3);
        RealtimeMetrics::record_connected(true);
    }

    #[test]
    fn test_names_are_namespaced() {
        for name in [
            names::REFRESH_STARTED,
            names::REFRESH_SUCCEEDED,
            names::REFRESH_FAILED,
            names::SESSION_EXPIRED,
        ] {
            assert!(name.starts_with("session."));
        }
        for name in [
            names::CONNECT_ATTEMPTS,
            names::CONNECT_OPENED,
            names::RECONNECT_SCHEDULED,
            names::MESSAGES_DISPATCHED,
            names::MESSAGES_DROPPED,
            names::CONNECTED,
        ] {
            assert!(name.starts_with("realtime."));
        }
    }
}
