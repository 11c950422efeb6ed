use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use rastreo_protocol::ids::OrderId;
use rastreo_protocol::wire::{ClientMessage, ServerMessage};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::Claims;
use crate::error::ApiError;
use crate::state::AppState;

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Realtime endpoint. Browser WebSockets cannot set headers, so the token
/// is accepted from either the `Authorization` header or `?token=`.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
        .or(query.token);
    let Some(token) = token else {
        return ApiError::Unauthorized.into_response();
    };
    let claims = match state.verifier.verify(&token) {
        Ok(claims) => claims,
        Err(_) => return ApiError::Unauthorized.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, claims, socket))
}

/// One connection may join any number of order rooms; each join spawns a
/// forwarding task draining that room's subscription into the shared
/// writer. Everything is torn down when the socket closes. Membership is
/// purely in-memory and clients rejoin after a reconnect.
async fn handle_socket(state: AppState, claims: Claims, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let writer: JoinHandle<()> = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(payload) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let mut room_tasks: HashMap<OrderId, JoinHandle<()>> = HashMap::new();
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(raw) => match ClientMessage::from_json(raw.as_str()) {
                Ok(ClientMessage::JoinOrderRoom { pedido_id }) => {
                    if !authorized_for_order(&state, &claims, &pedido_id).await {
                        debug!(order = %pedido_id, principal = %claims.sub, "room join rejected");
                        let _ = outbound_tx
                            .send(ServerMessage::Error {
                                message: format!("no autorizado para el pedido {pedido_id}"),
                            })
                            .await;
                        continue;
                    }

                    if !room_tasks.contains_key(&pedido_id) {
                        let mut subscription = state.hub.subscribe(pedido_id.clone());
                        let forward_tx = outbound_tx.clone();
                        let task = tokio::spawn(async move {
                            while let Some(envelope) = subscription.next_event().await {
                                let message = ServerMessage::from_room_event(
                                    envelope.order_id,
                                    envelope.event,
                                );
                                if forward_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                        });
                        room_tasks.insert(pedido_id.clone(), task);
                    }
                    let _ = outbound_tx
                        .send(ServerMessage::RoomJoined { pedido_id })
                        .await;
                }
                Err(error) => {
                    let _ = outbound_tx
                        .send(ServerMessage::Error {
                            message: error.to_string(),
                        })
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, task) in room_tasks {
        task.abort();
    }
    drop(outbound_tx);
    writer.abort();
}

/// Join-time capability check: staff may watch any order, customers only
/// their own. Unknown orders are rejected the same way as foreign ones.
async fn authorized_for_order(state: &AppState, claims: &Claims, order_id: &OrderId) -> bool {
    if claims.role.is_staff() {
        return true;
    }
    let store = state.store.lock().await;
    match store.get_order(order_id) {
        Ok(order) => order.customer_id.as_str() == claims.sub,
        Err(_) => false,
    }
}
