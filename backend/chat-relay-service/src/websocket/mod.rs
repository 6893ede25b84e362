use crate::metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError, Receiver, Sender},
    RwLock,
};
use uuid::Uuid;

pub mod events;

pub use events::{BroadcastEvent, EventSink};

/// Frames buffered per connection before deliveries to it are skipped.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Handle for one push-channel connection in the relay's single room.
///
/// Issued by [`ConnectionRegistry::add_subscriber`]; the session hands it back
/// to [`ConnectionRegistry::remove_subscriber`] when the socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0.simple())
    }
}

/// Broadcast hub: every connected client, all in one room
///
/// Each client owns the receiving half of a bounded channel; the registry
/// keeps the sending halves. A client that stops reading fills its buffer
/// and then misses events until it catches up, or until the heartbeat drops
/// it. Membership changes and broadcasts take the same lock, so a broadcast
/// never observes a half-applied add or remove.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<SubscriberId, Sender<String>>>>,
    buffer: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose per-connection buffers hold `buffer` frames (at least one).
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::default(),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection
    ///
    /// Returns the subscriber id (needed for cleanup) and the receiver that
    /// yields serialized events for this connection.
    pub async fn add_subscriber(&self) -> (SubscriberId, Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let subscriber_id = SubscriberId::generate();

        let mut guard = self.inner.write().await;
        guard.insert(subscriber_id, tx);
        metrics::CONNECTED_CLIENTS.set(guard.len() as i64);

        tracing::debug!(
            %subscriber_id,
            total_subscribers = guard.len(),
            "Added subscriber"
        );

        (subscriber_id, rx)
    }

    /// Remove a subscriber. Must be called when a connection closes.
    pub async fn remove_subscriber(&self, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if guard.remove(&subscriber_id).is_some() {
            metrics::CONNECTED_CLIENTS.set(guard.len() as i64);
            tracing::debug!(
                %subscriber_id,
                remaining = guard.len(),
                "Removed subscriber"
            );
        }
    }

    /// Deliver an event to every registered connection
    ///
    /// Best effort: a connection whose receiver is gone is pruned, one whose
    /// buffer is full is skipped for this event. The rest still get it.
    /// Returns the number of deliveries.
    pub async fn broadcast(&self, event: &BroadcastEvent) -> usize {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, event_type = event.kind(), "Failed to serialize event");
                return 0;
            }
        };

        let mut guard = self.inner.write().await;
        let before = guard.len();
        let mut lagging = 0usize;

        guard.retain(|subscriber_id, sender| match sender.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                lagging += 1;
                tracing::debug!(%subscriber_id, "Subscriber buffer full, skipping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        let after = guard.len();
        let closed = before - after;
        metrics::EVENTS_BROADCAST.inc();
        if closed + lagging > 0 {
            metrics::DELIVERIES_DROPPED.inc_by((closed + lagging) as u64);
        }
        if closed > 0 {
            metrics::CONNECTED_CLIENTS.set(after as i64);
            tracing::debug!(
                event_type = event.kind(),
                closed,
                active = after,
                "Broadcast pruned closed connections"
            );
        }

        after - lagging
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl EventSink for ConnectionRegistry {
    async fn publish(&self, event: BroadcastEvent) {
        self.broadcast(&event).await;
    }
}
