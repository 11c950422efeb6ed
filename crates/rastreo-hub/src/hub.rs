use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use rastreo_protocol::ids::OrderId;
use rastreo_protocol::wire::RoomEvent;
use tokio::sync::broadcast;

use crate::envelope::RoomEventEnvelope;

pub const DEFAULT_ROOM_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingHubConfig {
    pub room_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for TrackingHubConfig {
    fn default() -> Self {
        Self {
            room_buffer_capacity: DEFAULT_ROOM_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

/// Routes tracking events to the subscribers of one order's room.
///
/// Rooms are created implicitly on first subscribe and live in memory only;
/// a restarted process starts with an empty routing table and clients
/// rejoin. Delivery is best-effort: no acknowledgment, no retry, and an
/// event published to a room with no subscribers is dropped.
///
/// The hub is constructed once at startup and handed around as an `Arc`;
/// route handlers and the outbox dispatcher receive it by injection rather
/// than through a process-global.
#[derive(Debug)]
pub struct TrackingHub {
    next_sequence: AtomicU64,
    config: TrackingHubConfig,
    rooms: RwLock<HashMap<OrderId, broadcast::Sender<RoomEventEnvelope>>>,
    global_sender: broadcast::Sender<RoomEventEnvelope>,
}

impl Default for TrackingHub {
    fn default() -> Self {
        Self::new(TrackingHubConfig::default())
    }
}

impl TrackingHub {
    pub fn new(config: TrackingHubConfig) -> Self {
        assert!(
            config.room_buffer_capacity > 0,
            "room_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            config,
            rooms: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    /// Joins the room for `order_id`, creating it on first use. A caller may
    /// hold subscriptions to any number of rooms at once.
    pub fn subscribe(&self, order_id: OrderId) -> RoomSubscription {
        if let Some(sender) = self.room_sender(&order_id) {
            return RoomSubscription::new(sender.subscribe());
        }

        let mut rooms = self.rooms.write().expect("tracking hub room lock poisoned");
        let sender = rooms.entry(order_id).or_insert_with(|| {
            let (sender, _receiver) = broadcast::channel(self.config.room_buffer_capacity);
            sender
        });
        RoomSubscription::new(sender.subscribe())
    }

    /// Feed of every room's events, for ops dashboards.
    pub fn subscribe_all(&self) -> GlobalSubscription {
        GlobalSubscription {
            inner: RoomSubscription::new(self.global_sender.subscribe()),
        }
    }

    /// Drops the room, closing all of its subscriptions. A later subscribe
    /// recreates it from scratch.
    pub fn remove_room(&self, order_id: &OrderId) -> bool {
        let mut rooms = self.rooms.write().expect("tracking hub room lock poisoned");
        rooms.remove(order_id).is_some()
    }

    /// Delivers `event` to every current subscriber of the order's room and
    /// to the global feed. Fire-and-forget: send failures and empty rooms
    /// are not errors.
    pub fn publish(&self, order_id: OrderId, event: RoomEvent) -> RoomEventEnvelope {
        let envelope = RoomEventEnvelope {
            order_id,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
            event,
        };

        if let Some(sender) = self.room_sender(&envelope.order_id) {
            if sender.receiver_count() > 0 {
                let _ = sender.send(envelope.clone());
            } else {
                // Every subscriber left; reclaim the room. A later join
                // recreates it.
                self.remove_room(&envelope.order_id);
            }
        }
        if self.global_sender.receiver_count() > 0 {
            let _ = self.global_sender.send(envelope.clone());
        }

        envelope
    }

    pub fn room_count(&self) -> usize {
        self.rooms
            .read()
            .expect("tracking hub room lock poisoned")
            .len()
    }

    fn room_sender(&self, order_id: &OrderId) -> Option<broadcast::Sender<RoomEventEnvelope>> {
        let rooms = self.rooms.read().expect("tracking hub room lock poisoned");
        rooms.get(order_id).cloned()
    }
}

/// Receiving half of a room membership. Dropping it leaves the room.
#[derive(Debug)]
pub struct RoomSubscription {
    receiver: broadcast::Receiver<RoomEventEnvelope>,
}

impl RoomSubscription {
    fn new(receiver: broadcast::Receiver<RoomEventEnvelope>) -> Self {
        Self { receiver }
    }

    /// Next event in emission order, or `None` once the room is gone. A
    /// subscriber that falls behind the buffer skips the overwritten events
    /// and keeps receiving from the oldest retained one.
    pub async fn next_event(&mut self) -> Option<RoomEventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "room subscriber lagged; continuing");
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct GlobalSubscription {
    inner: RoomSubscription,
}

impl GlobalSubscription {
    pub async fn next_event(&mut self) -> Option<RoomEventEnvelope> {
        self.inner.next_event().await
    }
}
