//! Order-scoped publish/fanout hub for tracking updates.

pub mod envelope;
pub mod hub;

pub use envelope::RoomEventEnvelope;
pub use hub::{
    GlobalSubscription, RoomSubscription, TrackingHub, TrackingHubConfig,
    DEFAULT_GLOBAL_BUFFER_CAPACITY, DEFAULT_ROOM_BUFFER_CAPACITY,
};
