use std::sync::{Arc, RwLock};

use rastreo_protocol::ids::OrderId;
use rastreo_protocol::order::OrderStatus;
use rastreo_protocol::tracking::TrackingState;
use rastreo_protocol::wire::ServerMessage;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::manager::ConnectionManager;

pub type StatusCallback = Box<dyn Fn(OrderStatus) + Send + Sync>;

/// What the tracking screen renders. Purely reactive: mutated only by the
/// snapshot fetch and by room events for this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingViewState {
    pub estado_pedido: Option<OrderStatus>,
    pub seguimiento: Option<TrackingState>,
    pub fetch_error: Option<String>,
}

/// Live view model for one order's shipment state.
///
/// On attach it joins the order's room (silently skipped while the socket
/// is down) and listens for `trackingUpdated` / `trackingEventAdded` for
/// its order; the initial snapshot comes from a separate REST fetch and
/// never waits on the socket. Dropping the view detaches both listeners,
/// so later room emits touch nothing. There is no polling fallback: with
/// the socket gone the view keeps showing the last fetched snapshot.
pub struct OrderTrackingView {
    order_id: OrderId,
    state: Arc<RwLock<TrackingViewState>>,
    listener: JoinHandle<()>,
}

impl OrderTrackingView {
    pub fn attach(
        manager: &ConnectionManager,
        order_id: OrderId,
        on_status_change: Option<StatusCallback>,
    ) -> Self {
        if manager.is_connected() {
            manager.join_order_room(&order_id);
        }

        let state = Arc::new(RwLock::new(TrackingViewState::default()));
        let listener = tokio::spawn(listen(
            manager.subscribe_messages(),
            order_id.clone(),
            Arc::clone(&state),
            on_status_change,
        ));

        Self {
            order_id,
            state,
            listener,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn current(&self) -> TrackingViewState {
        self.state
            .read()
            .expect("tracking view state lock poisoned")
            .clone()
    }

    /// Fetches the initial snapshot over REST. A failure is shown inline on
    /// the view and is not retried automatically.
    pub async fn load_snapshot(&self, api: &ApiClient) {
        match api.fetch_tracking(&self.order_id).await {
            Ok(snapshot) => {
                let mut state = self
                    .state
                    .write()
                    .expect("tracking view state lock poisoned");
                state.estado_pedido = Some(snapshot.estado_pedido);
                state.seguimiento = snapshot.seguimiento;
                state.fetch_error = None;
            }
            Err(error) => {
                let mut state = self
                    .state
                    .write()
                    .expect("tracking view state lock poisoned");
                state.fetch_error = Some(error.to_string());
            }
        }
    }
}

impl Drop for OrderTrackingView {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(
    mut messages: broadcast::Receiver<ServerMessage>,
    order_id: OrderId,
    state: Arc<RwLock<TrackingViewState>>,
    on_status_change: Option<StatusCallback>,
) {
    loop {
        match messages.recv().await {
            Ok(message) => apply(&order_id, &state, &on_status_change, message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, order = %order_id, "tracking view lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn apply(
    order_id: &OrderId,
    state: &RwLock<TrackingViewState>,
    on_status_change: &Option<StatusCallback>,
    message: ServerMessage,
) {
    match message {
        ServerMessage::TrackingUpdated {
            pedido_id,
            seguimiento,
            estado_pedido,
        } if pedido_id == *order_id => {
            {
                let mut state = state.write().expect("tracking view state lock poisoned");
                state.seguimiento = seguimiento;
                if let Some(status) = estado_pedido {
                    state.estado_pedido = Some(status);
                }
            }
            if let (Some(callback), Some(status)) = (on_status_change.as_ref(), estado_pedido) {
                callback(status);
            }
        }
        ServerMessage::TrackingEventAdded {
            pedido_id,
            seguimiento,
        } if pedido_id == *order_id => {
            // Full-replace semantics: the payload carries the whole updated
            // history, not a delta. The status callback is never involved.
            let mut state = state.write().expect("tracking view state lock poisoned");
            state.seguimiento = Some(seguimiento);
        }
        _ => {}
    }
}
