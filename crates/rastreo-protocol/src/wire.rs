use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::OrderId;
use crate::order::OrderStatus;
use crate::tracking::TrackingState;

/// Payload routed through an order's broadcast room. The room itself scopes
/// the order, so the order id lives on the envelope, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    /// Full replacement of the subscriber's tracking state. Carries the new
    /// order status when the originating write changed it.
    #[serde(rename = "trackingUpdated")]
    TrackingUpdated {
        seguimiento: Option<TrackingState>,
        #[serde(rename = "estadoPedido", skip_serializing_if = "Option::is_none")]
        estado_pedido: Option<OrderStatus>,
    },
    /// One history entry was appended. The payload still carries the full
    /// updated history; subscribers replace wholesale. The name is
    /// historical and the browser client already assumes full-replace.
    #[serde(rename = "trackingEventAdded")]
    TrackingEventAdded { seguimiento: TrackingState },
}

/// Messages a connected client may send over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "joinOrderRoom")]
    JoinOrderRoom {
        #[serde(rename = "pedidoId")]
        pedido_id: OrderId,
    },
}

impl ClientMessage {
    pub fn from_json(raw: &str) -> ProtocolResult<Self> {
        serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))
    }
}

/// Messages the server pushes to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "roomJoined")]
    RoomJoined {
        #[serde(rename = "pedidoId")]
        pedido_id: OrderId,
    },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "trackingUpdated")]
    TrackingUpdated {
        #[serde(rename = "pedidoId")]
        pedido_id: OrderId,
        seguimiento: Option<TrackingState>,
        #[serde(rename = "estadoPedido", skip_serializing_if = "Option::is_none")]
        estado_pedido: Option<OrderStatus>,
    },
    #[serde(rename = "trackingEventAdded")]
    TrackingEventAdded {
        #[serde(rename = "pedidoId")]
        pedido_id: OrderId,
        seguimiento: TrackingState,
    },
}

impl ServerMessage {
    pub fn from_room_event(pedido_id: OrderId, event: RoomEvent) -> Self {
        match event {
            RoomEvent::TrackingUpdated {
                seguimiento,
                estado_pedido,
            } => Self::TrackingUpdated {
                pedido_id,
                seguimiento,
                estado_pedido,
            },
            RoomEvent::TrackingEventAdded { seguimiento } => Self::TrackingEventAdded {
                pedido_id,
                seguimiento,
            },
        }
    }

    pub fn from_json(raw: &str) -> ProtocolResult<Self> {
        serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))
    }
}
