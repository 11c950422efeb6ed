use rastreo_protocol::ids::OrderId;
use rastreo_protocol::wire::RoomEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEventEnvelope {
    pub order_id: OrderId,
    pub sequence: u64,
    pub event: RoomEvent,
}
