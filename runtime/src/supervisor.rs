//! Realtime connection supervisor.
//!
//! Runs [`ConnectionReducer`] and executes its effects: connection attempts,
//! the reconnect timer, the socket reader and writer, the `connected` signal
//! and advisories.
//!
//! Transitions happen under one lock and every effect is synchronous
//! (spawn, abort, signal), so the reducer state and the tasks it describes
//! can never disagree. All I/O happens on spawned tasks that report back
//! with the epoch they were started for; reports for a superseded epoch are
//! ignored by the reducer.

use courier_session_core::config::RealtimeConfig;
use courier_session_core::connection::{
    ConnectionAction, ConnectionEffect, ConnectionPhase, ConnectionReducer, ConnectionState,
};
use courier_session_core::error::SessionError;
use courier_session_core::events::Advisory;
use courier_session_core::message::ChannelMessage;
use courier_session_core::providers::{FrameSink, FrameStream, RealtimeConnector, RealtimeLink};
use courier_session_core::reducer::Reducer;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use crate::channels::ChannelBus;
use crate::metrics::RealtimeMetrics;
use crate::tasks::ScopedTask;
use crate::tokens::TokenSource;

/// Capacity of the advisory broadcast channel.
const ADVISORY_CAPACITY: usize = 16;

struct Socket {
    epoch: u64,
    /// Cleared on disconnect so frames already in hand are not dispatched.
    live: Arc<AtomicBool>,
    _reader: ScopedTask,
}

#[derive(Default)]
struct Slot {
    state: ConnectionState,
    attempt: Option<ScopedTask>,
    reconnect: Option<ScopedTask>,
    socket: Option<Socket>,
}

struct SupervisorInner<K, T> {
    connector: K,
    tokens: T,
    config: RealtimeConfig,
    bus: ChannelBus,
    slot: Mutex<Slot>,
    connected: watch::Sender<bool>,
    advisories: broadcast::Sender<Advisory>,
}

/// Owns the single realtime connection of a session.
///
/// Cheap to clone; clones drive the same connection. Dropping the last clone
/// aborts every timer and socket task.
///
/// # Type Parameters
///
/// - `K`: Realtime connector
/// - `T`: Token source consulted before every connection attempt
pub struct RealtimeSupervisor<K, T> {
    inner: Arc<SupervisorInner<K, T>>,
}

impl<K, T> Clone for RealtimeSupervisor<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, T> RealtimeSupervisor<K, T>
where
    K: RealtimeConnector,
    T: TokenSource,
{
    /// Create an idle supervisor.
    #[must_use]
    pub fn new(connector: K, tokens: T, config: RealtimeConfig) -> Self {
        let (connected, _) = watch::channel(false);
        let (advisories, _) = broadcast::channel(ADVISORY_CAPACITY);
        Self {
            inner: Arc::new(SupervisorInner {
                connector,
                tokens,
                config,
                bus: ChannelBus::new(),
                slot: Mutex::new(Slot::default()),
                connected,
                advisories,
            }),
        }
    }

    /// Begin connecting. No-op unless idle.
    ///
    /// Returns immediately; progress is observable through
    /// [`watch_connected`](Self::watch_connected).
    pub fn start(&self) {
        self.inner.apply(ConnectionAction::Start);
    }

    /// Tear down the connection, disarm the reconnect timer and drop every
    /// channel registration. Idempotent.
    pub fn stop(&self) {
        self.inner.apply(ConnectionAction::Stop);
    }

    /// `true` while the connection is open.
    #[must_use]
    pub fn connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Observe the `connected` signal.
    #[must_use]
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Observe connection advisories.
    #[must_use]
    pub fn advisories(&self) -> broadcast::Receiver<Advisory> {
        self.inner.advisories.subscribe()
    }

    /// The channel bus carried by this connection.
    #[must_use]
    pub fn bus(&self) -> &ChannelBus {
        &self.inner.bus
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.inner.slot).state.phase
    }

    /// Send on the bus; see [`ChannelBus::send`].
    pub fn send(&self, message: &ChannelMessage) -> bool {
        self.inner.bus.send(message)
    }

    /// Publish an advisory raised outside the connection (session expiry).
    pub(crate) fn advise(&self, advisory: Advisory) {
        let _ = self.inner.advisories.send(advisory);
    }
}

impl<K, T> SupervisorInner<K, T>
where
    K: RealtimeConnector,
    T: TokenSource,
{
    fn apply(self: &Arc<Self>, action: ConnectionAction) {
        let mut slot = lock(&self.slot);
        self.apply_locked(&mut slot, action);
    }

    /// Apply `action` only if attempt `epoch` is still the current one.
    fn apply_for_epoch(self: &Arc<Self>, epoch: u64, action: ConnectionAction) {
        let mut slot = lock(&self.slot);
        if slot.state.epoch == epoch {
            self.apply_locked(&mut slot, action);
        }
    }

    fn apply_locked(self: &Arc<Self>, slot: &mut Slot, action: ConnectionAction) {
        let from = slot.state.phase;
        let effects = ConnectionReducer.reduce(&mut slot.state, action, &self.config.reconnect);
        if from != slot.state.phase {
            tracing::debug!(
                from = ?from,
                to = ?slot.state.phase,
                epoch = slot.state.epoch,
                "Realtime connection transition"
            );
        }
        for effect in effects {
            self.execute(slot, effect);
        }
    }

    fn execute(self: &Arc<Self>, slot: &mut Slot, effect: ConnectionEffect) {
        match effect {
            ConnectionEffect::Connect { epoch } => {
                let this = Arc::downgrade(self);
                slot.attempt = Some(ScopedTask::spawn(Self::attempt(this, epoch)));
            }

            ConnectionEffect::ScheduleReconnect { delay } => {
                RealtimeMetrics::record_reconnect_scheduled();
                tracing::debug!(delay = ?delay, "Reconnect scheduled");
                let this = Arc::downgrade(self);
                slot.reconnect = Some(ScopedTask::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(this) = this.upgrade() {
                        let session_present = this.tokens.has_session();
                        this.apply(ConnectionAction::ReconnectDue { session_present });
                    }
                }));
            }

            ConnectionEffect::CancelReconnect => {
                if let Some(timer) = slot.reconnect.take() {
                    timer.cancel();
                }
                if let Some(attempt) = slot.attempt.take() {
                    attempt.cancel();
                }
            }

            ConnectionEffect::Disconnect => {
                if let Some(socket) = slot.socket.take() {
                    socket.live.store(false, Ordering::SeqCst);
                    tracing::debug!(epoch = socket.epoch, "Realtime socket dropped");
                }
                self.bus.detach();
            }

            ConnectionEffect::PublishConnected(connected) => {
                RealtimeMetrics::record_connected(connected);
                self.connected.send_replace(connected);
            }

            ConnectionEffect::ClearChannels => self.bus.clear(),

            ConnectionEffect::Advise(advisory) => {
                if let Advisory::ConnectionInterrupted { reason, retry_in } = &advisory {
                    tracing::warn!(
                        reason = %reason,
                        retry_in = ?retry_in,
                        "Realtime connection lost"
                    );
                }
                let _ = self.advisories.send(advisory);
            }
        }
    }

    async fn attempt(this: Weak<Self>, epoch: u64) {
        let Some(this) = this.upgrade() else {
            return;
        };
        RealtimeMetrics::record_attempt();

        // Never open a socket with a token already known to be stale.
        let session = match this.tokens.ensure_valid().await {
            Ok(session) => session,
            Err(e @ (SessionError::SessionExpired | SessionError::NotSignedIn)) => {
                tracing::debug!(epoch, error = %e, "No session for realtime, stopping");
                this.apply_for_epoch(epoch, ConnectionAction::Stop);
                return;
            }
            Err(e) => {
                this.apply(ConnectionAction::Failed {
                    epoch,
                    reason: e.to_string(),
                });
                return;
            }
        };

        // Bound now, so a token refreshed during the reconnect delay is used.
        let url = this
            .config
            .connect_url(session.user_id(), &session.access_token);
        tracing::info!(epoch, user_id = %session.user_id(), "Opening realtime connection");

        match this.connector.connect(&url).await {
            Ok(link) => this.install(epoch, link),
            Err(e) => this.apply(ConnectionAction::Failed {
                epoch,
                reason: e.to_string(),
            }),
        }
    }

    fn install(self: &Arc<Self>, epoch: u64, link: RealtimeLink) {
        let mut slot = lock(&self.slot);
        if slot.state.phase != ConnectionPhase::Connecting || slot.state.epoch != epoch {
            // Stopped (or restarted) while the handshake was in flight.
            tracing::debug!(epoch, current = slot.state.epoch, "Discarding stale handshake");
            return;
        }

        let RealtimeLink { sink, stream } = link;
        let (outbound, frames) = mpsc::unbounded_channel();
        // Detached rather than scoped: the close handshake has to outlive the
        // socket slot. It ends once the bus detaches `outbound` (or a send
        // fails), and the close itself is bounded by `close_timeout`.
        tokio::spawn(write_frames(frames, sink, self.config.close_timeout));

        let live = Arc::new(AtomicBool::new(true));
        let reader = ScopedTask::spawn(Self::read_frames(
            Arc::downgrade(self),
            epoch,
            stream,
            self.bus.clone(),
            Arc::clone(&live),
        ));
        slot.socket = Some(Socket {
            epoch,
            live,
            _reader: reader,
        });
        self.bus.attach(outbound);

        RealtimeMetrics::record_opened();
        tracing::info!(epoch, "Realtime connection open");
        self.apply_locked(&mut slot, ConnectionAction::Opened { epoch });
    }

    async fn read_frames(
        this: Weak<Self>,
        epoch: u64,
        mut stream: FrameStream,
        bus: ChannelBus,
        live: Arc<AtomicBool>,
    ) {
        let reason = loop {
            match stream.next().await {
                Some(Ok(frame)) => {
                    if !live.load(Ordering::SeqCst) {
                        return;
                    }
                    match serde_json::from_str::<ChannelMessage>(&frame) {
                        Ok(message) => {
                            bus.dispatch(&message);
                        }
                        Err(e) => tracing::warn!(epoch, error = %e, "Ignoring malformed realtime frame"),
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "connection closed".to_string(),
            }
        };

        if let Some(this) = this.upgrade() {
            this.apply(ConnectionAction::Failed { epoch, reason });
        }
    }
}

/// Forward outbound frames until the bus detaches, then close the sink.
async fn write_frames(
    mut frames: mpsc::UnboundedReceiver<String>,
    mut sink: FrameSink,
    close_timeout: Duration,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(frame).await {
            tracing::warn!(error = %e, "Realtime send failed");
            break;
        }
    }

    match tokio::time::timeout(close_timeout, sink.close()).await {
        Ok(Ok(())) => tracing::debug!("Realtime socket closed"),
        Ok(Err(e)) => tracing::debug!(error = %e, "Realtime socket closed with error"),
        Err(_) => tracing::debug!("Realtime socket close timed out"),
    }
}
