//! Channel bus.
//!
//! Maps channel names to subscriber callbacks on top of the single realtime
//! connection. Registrations survive reconnects; they are dropped only when
//! the supervisor stops (sign-out or expiry).
//!
//! Delivery within a channel follows subscription order and network arrival
//! order. Callbacks run on the connection's reader task, outside any lock, so
//! a callback may subscribe, unsubscribe or send.

use courier_session_core::message::ChannelMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

use crate::metrics::RealtimeMetrics;

type Callback = Box<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    id: u64,
    /// Cleared on removal so a snapshot taken before the removal skips it.
    active: AtomicBool,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    registry: Mutex<HashMap<String, Vec<Arc<Subscriber>>>>,
    /// Present only while the connection is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named-channel multiplexer over the realtime connection.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct ChannelBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for ChannelBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBus")
            .field("channels", &self.channel_count())
            .field("open", &self.is_open())
            .finish()
    }
}

impl ChannelBus {
    /// Create an empty bus with no connection attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for messages on `channel`.
    ///
    /// The returned capability removes exactly this registration; other
    /// subscribers of the same channel are unaffected. Dropping it without
    /// calling [`Unsubscribe::unsubscribe`] keeps the registration.
    pub fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> Unsubscribe
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });

        lock(&self.inner.registry)
            .entry(channel.clone())
            .or_default()
            .push(subscriber);
        tracing::debug!(channel = %channel, subscriber = id, "Subscribed");

        Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            channel,
            id,
        }
    }

    /// Remove every callback registered for `channel`. Returns how many were removed.
    pub fn unsubscribe(&self, channel: &str) -> usize {
        let removed = lock(&self.inner.registry).remove(channel).unwrap_or_default();
        for subscriber in &removed {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        if !removed.is_empty() {
            tracing::debug!(channel, count = removed.len(), "Unsubscribed channel");
        }
        removed.len()
    }

    /// Deliver `message.data` to every subscriber of `message.channel`, in
    /// subscription order. Returns the number of callbacks invoked; a message
    /// for a channel nobody listens to is dropped silently.
    pub fn dispatch(&self, message: &ChannelMessage) -> usize {
        let subscribers: Vec<Arc<Subscriber>> = match lock(&self.inner.registry).get(&message.channel)
        {
            Some(subscribers) => subscribers.clone(),
            None => {
                tracing::trace!(channel = %message.channel, "No subscribers, message dropped");
                return 0;
            }
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            // Removed by an earlier callback in this same dispatch.
            if !subscriber.active.load(Ordering::SeqCst) {
                continue;
            }
            (subscriber.callback)(&message.data);
            delivered += 1;
        }

        RealtimeMetrics::record_dispatched(delivered);
        delivered
    }

    /// Serialize and transmit `message` if the connection is open.
    ///
    /// Returns `false` (and drops the message) otherwise. Nothing is queued
    /// for later delivery.
    pub fn send(&self, message: &ChannelMessage) -> bool {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %message.channel, error = %e, "Unserializable message dropped");
                return false;
            }
        };

        let sent = lock(&self.inner.outbound)
            .as_ref()
            .is_some_and(|outbound| outbound.send(frame).is_ok());

        if !sent {
            RealtimeMetrics::record_dropped();
            tracing::debug!(channel = %message.channel, "Connection not open, message dropped");
        }
        sent
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let drained: Vec<Arc<Subscriber>> = lock(&self.inner.registry)
            .drain()
            .flat_map(|(_, subscribers)| subscribers)
            .collect();
        for subscriber in &drained {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Cleared all channel subscriptions");
        }
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Number of callbacks registered for `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.inner.registry).get(channel).map_or(0, Vec::len)
    }

    /// `true` while an open connection is attached.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.inner.outbound).is_some()
    }

    pub(crate) fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        *lock(&self.inner.outbound) = Some(outbound);
    }

    /// Detach the outbound channel; dropping the sender lets the writer close
    /// the socket.
    pub(crate) fn detach(&self) {
        lock(&self.inner.outbound).take();
    }
}

/// Capability removing one subscription.
#[derive(Debug)]
#[must_use = "dropping the capability keeps the subscription alive; call `unsubscribe` to remove it"]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    channel: String,
    id: u64,
}

impl Unsubscribe {
    /// Channel this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the subscription. Returns `false` if it was already gone
    /// (bulk unsubscribe, sign-out, or the bus was dropped).
    #[allow(clippy::needless_pass_by_value)]
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };

        let mut registry = lock(&bus.registry);
        let Some(subscribers) = registry.get_mut(&self.channel) else {
            return false;
        };
        let Some(index) = subscribers.iter().position(|s| s.id == self.id) else {
            return false;
        };

        let removed = subscribers.remove(index);
        removed.active.store(false, Ordering::SeqCst);
        if subscribers.is_empty() {
            registry.remove(&self.channel);
        }
        true
    }
}
