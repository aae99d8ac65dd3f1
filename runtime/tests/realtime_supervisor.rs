//! Integration tests for the realtime connection supervisor
//!
//! Reconnect timing, token binding at connect time, subscription survival
//! and teardown. Timer tests run on paused time, so the 5 second reconnect
//! delay elapses instantly once every task is idle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration as ChronoDuration;
use courier_session_core::{
    Advisory, ChannelMessage, ConnectionPhase, Credentials, RealtimeConfig, ReconnectPolicy,
    TokenConfig,
};
use courier_session_runtime::{RealtimeSupervisor, TokenLifecycleManager};
use courier_session_testing::{
    ConnectOutcome, InMemoryCredentialStore, ManualClock, MockAuthApi, MockConnector,
    init_tracing,
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

// ============================================================================
// Test Fixtures
// ============================================================================

type Tokens =
    TokenLifecycleManager<InMemoryCredentialStore, MockAuthApi<ManualClock>, ManualClock>;
type Supervisor = RealtimeSupervisor<MockConnector, Tokens>;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct Fixture {
    supervisor: Supervisor,
    connector: MockConnector,
    tokens: Tokens,
    api: MockAuthApi<ManualClock>,
    clock: ManualClock,
}

async fn fixture() -> Fixture {
    init_tracing();
    let clock = ManualClock::default();
    let api = MockAuthApi::new(clock.clone()).with_user("ada@example.com", "hunter2", "courier-1");
    let tokens = TokenLifecycleManager::new(
        InMemoryCredentialStore::new(),
        api.clone(),
        clock.clone(),
        TokenConfig::default(),
    );
    tokens
        .sign_in(&Credentials::new("ada@example.com", "hunter2"))
        .await
        .unwrap();

    let connector = MockConnector::new();
    let config = RealtimeConfig {
        endpoint: "ws://realtime.test/ws".to_string(),
        reconnect: ReconnectPolicy::Fixed(RECONNECT_DELAY),
        ..RealtimeConfig::default()
    };
    let supervisor = RealtimeSupervisor::new(connector.clone(), tokens.clone(), config);

    Fixture {
        supervisor,
        connector,
        tokens,
        api,
        clock,
    }
}

impl Fixture {
    async fn wait_connected(&self, connected: bool) {
        let mut watch = self.supervisor.watch_connected();
        watch.wait_for(|open| *open == connected).await.unwrap();
    }

    /// Subscribe and forward every delivery into a channel.
    fn record(&self, channel: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _subscription = self.supervisor.bus().subscribe(channel, move |data| {
            let _ = tx.send(data.clone());
        });
        rx
    }
}

/// Timer deadlines are rounded to the millisecond.
fn assert_delay(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

async fn next_interruption(advisories: &mut broadcast::Receiver<Advisory>) -> Duration {
    match advisories.recv().await.unwrap() {
        Advisory::ConnectionInterrupted { retry_in, .. } => retry_in,
        other => panic!("expected connection advisory, got {other:?}"),
    }
}

// ============================================================================
// Connecting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn connect_url_carries_current_identity_and_token() {
    let f = fixture().await;
    let token = f.tokens.current().unwrap().access_token;
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Idle);

    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    assert_eq!(
        server.url(),
        format!("ws://realtime.test/ws?userId=courier-1&token={}", token.as_str())
    );
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Open);
    assert!(f.supervisor.bus().is_open());
}

#[tokio::test(start_paused = true)]
async fn start_is_a_no_op_unless_idle() {
    let f = fixture().await;
    f.supervisor.start();
    f.supervisor.start();
    let _server = f.connector.next_connection().await;
    f.wait_connected(true).await;
    f.supervisor.start();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(f.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_token_is_refreshed_before_connecting() {
    let f = fixture().await;
    let stale = f.tokens.current().unwrap().access_token;
    f.clock.advance(ChronoDuration::hours(1));

    f.supervisor.start();
    let server = f.connector.next_connection().await;

    assert_eq!(f.api.refresh_calls(), 1);
    assert!(!server.url().contains(stale.as_str()));
    let fresh = f.tokens.current().unwrap().access_token;
    assert!(server.url().contains(fresh.as_str()));
}

// ============================================================================
// Reconnecting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reconnect_waits_the_fixed_delay() {
    let f = fixture().await;
    let mut advisories = f.supervisor.advisories();
    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    let dropped_at = Instant::now();
    server.close();
    assert_eq!(next_interruption(&mut advisories).await, RECONNECT_DELAY);
    assert!(!f.supervisor.connected());
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Closing);

    let _second = f.connector.next_connection().await;
    assert_delay(dropped_at.elapsed(), RECONNECT_DELAY);
    f.wait_connected(true).await;
}

#[tokio::test(start_paused = true)]
async fn handshake_failure_is_retried_after_the_delay() {
    let f = fixture().await;
    let mut advisories = f.supervisor.advisories();
    f.connector.script(ConnectOutcome::Reject("503".into()));

    let started = Instant::now();
    f.supervisor.start();
    assert_eq!(next_interruption(&mut advisories).await, RECONNECT_DELAY);

    let _server = f.connector.next_connection().await;
    assert_delay(started.elapsed(), RECONNECT_DELAY);
    assert_eq!(f.connector.attempts(), 2);
    f.wait_connected(true).await;
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_never_loop_tightly() {
    let f = fixture().await;
    for _ in 0..3 {
        f.connector.script(ConnectOutcome::Reject("down".into()));
    }

    let started = Instant::now();
    f.supervisor.start();
    let _server = f.connector.next_connection().await;

    assert_eq!(f.connector.attempts(), 4);
    assert_delay(started.elapsed(), RECONNECT_DELAY * 3);
}

#[tokio::test(start_paused = true)]
async fn reconnect_uses_token_refreshed_during_delay() {
    let f = fixture().await;
    let mut advisories = f.supervisor.advisories();
    f.supervisor.start();
    let first = f.connector.next_connection().await;
    f.wait_connected(true).await;
    let original = f.tokens.current().unwrap().access_token;

    first.fail("connection reset");
    next_interruption(&mut advisories).await;

    // Another subsystem refreshes while the timer is pending.
    f.clock.advance(ChronoDuration::hours(1));
    let refreshed = f.tokens.ensure_valid().await.unwrap().access_token;
    assert_ne!(refreshed, original);

    let second = f.connector.next_connection().await;
    assert!(second.url().contains(refreshed.as_str()));
    assert!(!second.url().contains(original.as_str()));
    assert_eq!(f.api.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_survive_reconnect() {
    let f = fixture().await;
    let mut deliveries = f.record("delivery");
    let mut advisories = f.supervisor.advisories();

    f.supervisor.start();
    let first = f.connector.next_connection().await;
    f.wait_connected(true).await;
    first.push(&ChannelMessage::new("delivery", json!({"id": 1})));
    assert_eq!(deliveries.recv().await.unwrap(), json!({"id": 1}));

    first.fail("network blip");
    next_interruption(&mut advisories).await;
    assert_eq!(f.supervisor.bus().subscriber_count("delivery"), 1);

    let second = f.connector.next_connection().await;
    f.wait_connected(true).await;
    second.push(&ChannelMessage::new("delivery", json!({"id": 2})));
    assert_eq!(deliveries.recv().await.unwrap(), json!({"id": 2}));
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_ignored() {
    let f = fixture().await;
    let mut notifications = f.record("notification");
    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    server.push_raw("not json");
    server.push_raw(r#"{"data":{}}"#);
    server.push(&ChannelMessage::new("notification", json!({"id": 9})));

    assert_eq!(notifications.recv().await.unwrap(), json!({"id": 9}));
    assert!(f.supervisor.connected());
}

// ============================================================================
// Stopping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn stop_during_reconnect_delay_prevents_reconnect() {
    let f = fixture().await;
    let mut advisories = f.supervisor.advisories();
    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    server.fail("connection reset");
    next_interruption(&mut advisories).await;
    f.supervisor.stop();

    tokio::time::sleep(RECONNECT_DELAY * 10).await;
    assert_eq!(f.connector.attempts(), 1);
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_tears_down_socket_and_channels() {
    let f = fixture().await;
    let _deliveries = f.record("delivery");
    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    f.supervisor.stop();
    f.supervisor.stop();

    assert_eq!(f.supervisor.phase(), ConnectionPhase::Idle);
    assert!(!f.supervisor.connected());
    assert_eq!(f.supervisor.bus().channel_count(), 0);
    assert!(!f.supervisor.bus().is_open());
    // Writer closes the client sink once the bus lets go of it.
    assert_eq!(server.next_outbound().await, None);
}

#[tokio::test(start_paused = true)]
async fn stop_while_handshake_pending_never_opens() {
    let f = fixture().await;
    f.clock.advance(ChronoDuration::hours(1));
    f.api.hold_refreshes();

    f.supervisor.start();
    f.api.wait_for_refresh_calls(1).await;
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Connecting);
    f.supervisor.stop();
    f.api.release_refreshes();

    tokio::time::sleep(RECONNECT_DELAY * 4).await;
    assert_eq!(f.connector.attempts(), 0);
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Idle);
    assert!(!f.supervisor.connected());
}

#[tokio::test(start_paused = true)]
async fn expired_session_at_reconnect_goes_idle() {
    let f = fixture().await;
    let _deliveries = f.record("delivery");
    let mut advisories = f.supervisor.advisories();
    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    f.api.revoke_all();
    f.clock.advance(ChronoDuration::hours(1));
    server.fail("connection reset");
    next_interruption(&mut advisories).await;

    tokio::time::sleep(RECONNECT_DELAY * 2).await;
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Idle);
    assert_eq!(f.supervisor.bus().channel_count(), 0);
    assert_eq!(f.connector.attempts(), 1);
    assert!(!f.tokens.has_session());
}

#[tokio::test(start_paused = true)]
async fn signed_out_at_fire_time_goes_idle() {
    let f = fixture().await;
    let mut advisories = f.supervisor.advisories();
    f.supervisor.start();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;

    server.fail("connection reset");
    next_interruption(&mut advisories).await;
    f.tokens.sign_out(false).await.unwrap();

    tokio::time::sleep(RECONNECT_DELAY * 2).await;
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Idle);
    assert_eq!(f.connector.attempts(), 1);
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test(start_paused = true)]
async fn send_is_dropped_until_open() {
    let f = fixture().await;
    let location = ChannelMessage::new("location", json!({"lat": 52.5, "lng": 13.4}));
    assert!(!f.supervisor.send(&location));

    f.clock.advance(ChronoDuration::hours(1));
    f.api.hold_refreshes();
    f.supervisor.start();
    f.api.wait_for_refresh_calls(1).await;
    assert_eq!(f.supervisor.phase(), ConnectionPhase::Connecting);
    assert!(!f.supervisor.send(&location));

    f.api.release_refreshes();
    let server = f.connector.next_connection().await;
    f.wait_connected(true).await;
    assert!(f.supervisor.send(&location));

    assert_eq!(server.next_outbound_message().await, Some(location));
}
