use rastreo_protocol::ids::{CustomerId, OrderId};
use rastreo_protocol::wire::RoomEvent;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: CustomerId,
}

/// One broadcast written alongside its originating mutation, in the same
/// transaction. `dispatched_at` stays NULL until the dispatcher has pushed
/// the event into the hub; rows with NULL survive a crash and are replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub entry_id: i64,
    pub order_id: OrderId,
    pub event: RoomEvent,
    pub created_at: OffsetDateTime,
    pub dispatched_at: Option<OffsetDateTime>,
}
