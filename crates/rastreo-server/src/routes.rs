use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rastreo_protocol::ids::{CancellationRequestId, OrderId};
use rastreo_protocol::order::{CancellationRequest, CancellationState, Order};
use rastreo_protocol::rest::{
    AppendTrackingEventRequest, CreateOrderRequest, DecideCancellationRequest,
    SubmitCancellationRequest, UpdateStatusRequest,
};
use rastreo_protocol::tracking::{TrackingFields, TrackingSnapshot};
use rastreo_store::NewOrder;
use serde::Deserialize;

use crate::auth::Claims;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn create_order(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    require_staff(&claims)?;
    let mut store = state.store.lock().await;
    let order = store.create_order(NewOrder {
        id: body.pedido_id,
        customer_id: body.cliente_id,
    })?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = OrderId::new(id);
    let store = state.store.lock().await;
    let order = store.get_order(&order_id)?;
    authorize_order_access(&claims, &order)?;
    Ok(Json(order))
}

pub async fn tracking_snapshot(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<TrackingSnapshot>, ApiError> {
    let order_id = OrderId::new(id);
    let store = state.store.lock().await;
    let order = store.get_order(&order_id)?;
    authorize_order_access(&claims, &order)?;
    Ok(Json(store.tracking_snapshot(&order_id)?))
}

/// The write path persists the change and its broadcast in one
/// transaction; the dispatcher picks the broadcast up right after the
/// notify below. A crash between commit and emit is therefore replayed,
/// never lost.
pub async fn update_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<TrackingSnapshot>, ApiError> {
    require_staff(&claims)?;
    let order_id = OrderId::new(id);
    let snapshot = {
        let mut store = state.store.lock().await;
        let notes = body.notas.as_deref().filter(|notes| !notes.is_empty());
        store.update_status(&order_id, body.estado, notes)?;
        store.tracking_snapshot(&order_id)?
    };
    state.outbox_notify.notify_one();
    Ok(Json(snapshot))
}

pub async fn update_tracking(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<TrackingFields>,
) -> Result<Json<TrackingSnapshot>, ApiError> {
    require_staff(&claims)?;
    let order_id = OrderId::new(id);
    let snapshot = {
        let mut store = state.store.lock().await;
        store.update_tracking(&order_id, &body)?;
        store.tracking_snapshot(&order_id)?
    };
    state.outbox_notify.notify_one();
    Ok(Json(snapshot))
}

pub async fn append_tracking_event(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<AppendTrackingEventRequest>,
) -> Result<Json<TrackingSnapshot>, ApiError> {
    require_staff(&claims)?;
    if body.estado.trim().is_empty() {
        return Err(ApiError::BadRequest("estado must not be empty".to_owned()));
    }
    let order_id = OrderId::new(id);
    let snapshot = {
        let mut store = state.store.lock().await;
        store.append_tracking_event(&order_id, body.estado.trim())?;
        store.tracking_snapshot(&order_id)?
    };
    state.outbox_notify.notify_one();
    Ok(Json(snapshot))
}

pub async fn submit_cancellation(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<SubmitCancellationRequest>,
) -> Result<(StatusCode, Json<CancellationRequest>), ApiError> {
    require_staff(&claims)?;
    if body.motivo.trim().is_empty() {
        return Err(ApiError::BadRequest("motivo must not be empty".to_owned()));
    }
    let order_id = OrderId::new(id);
    let mut store = state.store.lock().await;
    let request = store.submit_cancellation(&order_id, body.motivo.trim(), &claims.sub)?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Debug, Deserialize)]
pub struct ListCancellationsQuery {
    pub estado: Option<String>,
}

pub async fn list_cancellations(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ListCancellationsQuery>,
) -> Result<Json<Vec<CancellationRequest>>, ApiError> {
    require_admin(&claims)?;
    let filter = query
        .estado
        .as_deref()
        .map(CancellationState::from_str)
        .transpose()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let store = state.store.lock().await;
    Ok(Json(store.list_cancellations(filter)?))
}

pub async fn decide_cancellation(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<DecideCancellationRequest>,
) -> Result<Json<CancellationRequest>, ApiError> {
    require_admin(&claims)?;
    let request_id = CancellationRequestId::new(id);
    let request = {
        let mut store = state.store.lock().await;
        store.decide_cancellation(&request_id, body.aprobar, &claims.sub)?
    };
    // Approval changed the order status, so a broadcast is waiting.
    state.outbox_notify.notify_one();
    Ok(Json(request))
}

pub fn require_staff(claims: &Claims) -> Result<(), ApiError> {
    if claims.role.is_staff() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub fn authorize_order_access(claims: &Claims, order: &Order) -> Result<(), ApiError> {
    if claims.role.is_staff() || order.customer_id.as_str() == claims.sub {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
