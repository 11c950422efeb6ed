use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One immutable entry in a shipment's status history. Once appended it is
/// never edited, reordered, or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Shipment-tracking snapshot attached to an order ("seguimiento").
/// History is insertion-ordered, oldest first; the browser renders it
/// reversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub tracking_number: String,
    pub carrier: String,
    pub tracking_url: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub estimated_delivery: Option<OffsetDateTime>,
    #[serde(default)]
    pub history: Vec<TrackingEvent>,
}

/// What the snapshot endpoint serves: the order's current status plus its
/// tracking state, which is absent until the order ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    #[serde(rename = "pedidoId")]
    pub pedido_id: crate::ids::OrderId,
    #[serde(rename = "estadoPedido")]
    pub estado_pedido: crate::order::OrderStatus,
    pub seguimiento: Option<TrackingState>,
}

/// Carrier fields an employee can set or replace in one write. History is
/// not part of this payload; it only grows through event appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingFields {
    pub tracking_number: String,
    pub carrier: String,
    pub tracking_url: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub estimated_delivery: Option<OffsetDateTime>,
}
