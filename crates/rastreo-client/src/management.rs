use std::fmt;
use std::sync::Arc;

use rastreo_protocol::ids::OrderId;
use rastreo_protocol::order::{CancellationRequest, OrderStatus};
use rastreo_protocol::tracking::{TrackingFields, TrackingSnapshot};

use crate::api::ApiClient;
use crate::error::ClientError;

/// A failed employee operation, ready to render as an inline toast naming
/// the operation that failed.
#[derive(Debug)]
pub struct OperationFailure {
    pub operation: &'static str,
    pub error: ClientError,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.error)
    }
}

impl std::error::Error for OperationFailure {}

/// Producer side of the tracking flow: the employee screen's mutations.
/// Each REST write persists server-side and fans out to the order's room as
/// part of the same request contract; there is no explicit broadcast call
/// here.
pub struct OrderManagement {
    api: Arc<ApiClient>,
}

impl OrderManagement {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn update_status(
        &self,
        order_id: &OrderId,
        estado: OrderStatus,
        notas: Option<String>,
    ) -> Result<TrackingSnapshot, OperationFailure> {
        self.api
            .update_status(order_id, estado, notas)
            .await
            .map_err(|error| OperationFailure {
                operation: "updating the order status",
                error,
            })
    }

    pub async fn update_tracking(
        &self,
        order_id: &OrderId,
        fields: &TrackingFields,
    ) -> Result<TrackingSnapshot, OperationFailure> {
        self.api
            .update_tracking(order_id, fields)
            .await
            .map_err(|error| OperationFailure {
                operation: "updating the tracking details",
                error,
            })
    }

    pub async fn append_tracking_event(
        &self,
        order_id: &OrderId,
        estado: impl Into<String>,
    ) -> Result<TrackingSnapshot, OperationFailure> {
        self.api
            .append_tracking_event(order_id, estado)
            .await
            .map_err(|error| OperationFailure {
                operation: "adding the tracking event",
                error,
            })
    }

    /// Distinct from the tracking flow: queues a request an administrator
    /// must approve or reject.
    pub async fn submit_cancellation(
        &self,
        order_id: &OrderId,
        motivo: impl Into<String>,
    ) -> Result<CancellationRequest, OperationFailure> {
        self.api
            .submit_cancellation(order_id, motivo)
            .await
            .map_err(|error| OperationFailure {
                operation: "submitting the cancellation request",
                error,
            })
    }
}
