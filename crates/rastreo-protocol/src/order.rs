use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ProtocolError;
use crate::ids::{CancellationRequestId, CustomerId, OrderId};

/// Storefront order lifecycle. The wire spellings match the existing
/// storefront database and browser client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pendiente,
    Procesando,
    Enviado,
    Entregado,
    Cancelado,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pendiente => "pendiente",
            Self::Procesando => "procesando",
            Self::Enviado => "enviado",
            Self::Entregado => "entregado",
            Self::Cancelado => "cancelado",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Entregado | Self::Cancelado)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pendiente" => Ok(Self::Pendiente),
            "procesando" => Ok(Self::Procesando),
            "enviado" => Ok(Self::Enviado),
            "entregado" => Ok(Self::Entregado),
            "cancelado" => Ok(Self::Cancelado),
            other => Err(ProtocolError::UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationState {
    Pendiente,
    Aprobada,
    Rechazada,
}

impl CancellationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pendiente => "pendiente",
            Self::Aprobada => "aprobada",
            Self::Rechazada => "rechazada",
        }
    }

    pub fn is_decided(self) -> bool {
        matches!(self, Self::Aprobada | Self::Rechazada)
    }
}

impl FromStr for CancellationState {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pendiente" => Ok(Self::Pendiente),
            "aprobada" => Ok(Self::Aprobada),
            "rechazada" => Ok(Self::Rechazada),
            other => Err(ProtocolError::UnknownStatus(other.to_owned())),
        }
    }
}

/// One entry in the employee-submitted, admin-decided cancellation queue.
/// The queue is a plain approval workflow; it rides the same persistence
/// and broadcast path as any other status change once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequest {
    pub id: CancellationRequestId,
    pub order_id: OrderId,
    pub reason: String,
    pub requested_by: String,
    pub state: CancellationState,
    pub decided_by: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub decided_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}
