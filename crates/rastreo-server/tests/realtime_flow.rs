use std::sync::Arc;
use std::time::Duration;

use rastreo_client::{
    ApiClient, ClientError, ConnectionManager, ConnectionManagerConfig, OrderManagement,
    OrderTrackingView, WebSocketTransport,
};
use rastreo_config::RastreoConfig;
use rastreo_protocol::ids::{CustomerId, OrderId};
use rastreo_protocol::order::OrderStatus;
use rastreo_protocol::rest::CreateOrderRequest;
use rastreo_protocol::tracking::TrackingFields;
use rastreo_protocol::wire::ServerMessage;
use rastreo_server::auth::{issue_token, Role};
use rastreo_server::{build_router, build_state, dispatcher};
use rastreo_store::TrackingStore;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "secreto-de-prueba";

struct TestServer {
    base_url: String,
    ws_url: String,
    server: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
        self.dispatcher.abort();
    }
}

async fn start_server() -> TestServer {
    let mut config = RastreoConfig::default();
    config.auth.token_secret = SECRET.to_owned();
    config.outbox.poll_interval_ms = 50;

    let store = TrackingStore::in_memory().expect("open in-memory store");
    let state = build_state(&config, store);
    let dispatcher = dispatcher::spawn(
        Arc::clone(&state.store),
        Arc::clone(&state.hub),
        Arc::clone(&state.outbox_notify),
        config.outbox_runtime(),
    );
    let app = build_router(state, "*");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    TestServer {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        server,
        dispatcher,
    }
}

fn token_for(sub: &str, role: Role) -> String {
    issue_token(SECRET, sub, role, Duration::from_secs(3600)).expect("issue token")
}

fn api_for(server: &TestServer, sub: &str, role: Role) -> ApiClient {
    ApiClient::new(server.base_url.clone(), Some(token_for(sub, role)))
}

fn manager_for(server: &TestServer, sub: &str, role: Role) -> ConnectionManager {
    let config = ConnectionManagerConfig::for_url(server.ws_url.clone())
        .with_token(token_for(sub, role));
    ConnectionManager::connect(Arc::new(WebSocketTransport), config)
}

async fn wait_until(mut predicate: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        if predicate() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting: {what}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

async fn create_order(api: &ApiClient, order_id: &str, customer_id: &str) {
    api.create_order(&CreateOrderRequest {
        pedido_id: OrderId::new(order_id),
        cliente_id: CustomerId::new(customer_id),
    })
    .await
    .expect("create order");
}

async fn join_room(
    manager: &ConnectionManager,
    messages: &mut broadcast::Receiver<ServerMessage>,
    order_id: &str,
) {
    wait_until(|| manager.is_connected(), "manager should connect").await;
    manager.join_order_room(&OrderId::new(order_id));
    loop {
        let message = timeout(TEST_TIMEOUT, messages.recv())
            .await
            .expect("join ack timeout")
            .expect("join ack should arrive");
        if matches!(message, ServerMessage::RoomJoined { ref pedido_id } if pedido_id.as_str() == order_id)
        {
            return;
        }
    }
}

async fn next_tracking_updated(
    messages: &mut broadcast::Receiver<ServerMessage>,
) -> (OrderId, Option<OrderStatus>) {
    loop {
        let message = timeout(TEST_TIMEOUT, messages.recv())
            .await
            .expect("tracking update timeout")
            .expect("tracking update should arrive");
        if let ServerMessage::TrackingUpdated {
            pedido_id,
            estado_pedido,
            ..
        } = message
        {
            return (pedido_id, estado_pedido);
        }
    }
}

#[tokio::test]
async fn status_update_reaches_every_subscribed_connection_once() {
    let server = start_server().await;
    let staff_api = api_for(&server, "emp-1", Role::Empleado);
    create_order(&staff_api, "ORD123", "CLI-1").await;

    let tab_a = manager_for(&server, "emp-2", Role::Empleado);
    let tab_b = manager_for(&server, "emp-3", Role::Empleado);
    let mut messages_a = tab_a.subscribe_messages();
    let mut messages_b = tab_b.subscribe_messages();
    join_room(&tab_a, &mut messages_a, "ORD123").await;
    join_room(&tab_b, &mut messages_b, "ORD123").await;

    let management = OrderManagement::new(Arc::new(staff_api));
    management
        .update_status(&OrderId::new("ORD123"), OrderStatus::Enviado, None)
        .await
        .expect("update status");

    for messages in [&mut messages_a, &mut messages_b] {
        let (pedido_id, estado) = next_tracking_updated(messages).await;
        assert_eq!(pedido_id.as_str(), "ORD123");
        assert_eq!(estado, Some(OrderStatus::Enviado));
    }

    // No duplicates arrive after the single fanout.
    sleep(Duration::from_millis(300)).await;
    assert!(messages_a.try_recv().is_err());
    assert!(messages_b.try_recv().is_err());
}

#[tokio::test]
async fn customers_cannot_join_a_foreign_orders_room() {
    let server = start_server().await;
    let staff_api = api_for(&server, "emp-1", Role::Empleado);
    create_order(&staff_api, "ORD200", "CLI-1").await;

    let owner = manager_for(&server, "CLI-1", Role::Cliente);
    let mut owner_messages = owner.subscribe_messages();
    join_room(&owner, &mut owner_messages, "ORD200").await;

    let intruder = manager_for(&server, "CLI-2", Role::Cliente);
    let mut intruder_messages = intruder.subscribe_messages();
    wait_until(|| intruder.is_connected(), "intruder should connect").await;
    intruder.join_order_room(&OrderId::new("ORD200"));

    let rejection = timeout(TEST_TIMEOUT, intruder_messages.recv())
        .await
        .expect("rejection timeout")
        .expect("rejection should arrive");
    assert!(matches!(rejection, ServerMessage::Error { .. }));

    staff_api
        .update_status(&OrderId::new("ORD200"), OrderStatus::Procesando, None)
        .await
        .expect("update status");

    // The owner sees the update; the rejected join never subscribed.
    let (pedido_id, estado) = next_tracking_updated(&mut owner_messages).await;
    assert_eq!(pedido_id.as_str(), "ORD200");
    assert_eq!(estado, Some(OrderStatus::Procesando));
    sleep(Duration::from_millis(300)).await;
    assert!(intruder_messages.try_recv().is_err());
}

#[tokio::test]
async fn a_401_clears_the_stored_token() {
    let server = start_server().await;
    let api = ApiClient::new(server.base_url.clone(), Some("basura".to_owned()));

    let err = api
        .fetch_tracking(&OrderId::new("ORD1"))
        .await
        .expect_err("garbage token must be rejected");
    assert!(matches!(err, ClientError::SessionExpired));
    assert!(api.token().is_none(), "401 clears the stored token");
}

#[tokio::test]
async fn customers_cannot_mutate_order_state() {
    let server = start_server().await;
    let staff_api = api_for(&server, "emp-1", Role::Empleado);
    create_order(&staff_api, "ORD300", "CLI-1").await;

    let customer_api = api_for(&server, "CLI-1", Role::Cliente);
    let err = customer_api
        .update_status(&OrderId::new("ORD300"), OrderStatus::Cancelado, None)
        .await
        .expect_err("customers must not change status");
    match err {
        ClientError::Api { status, .. } => assert_eq!(status, 403),
        other => panic!("expected 403 api error, got {other:?}"),
    }
}

#[tokio::test]
async fn snapshot_backfills_history_and_live_events_extend_it() {
    let server = start_server().await;
    let staff_api = api_for(&server, "emp-1", Role::Empleado);
    create_order(&staff_api, "ORD400", "CLI-1").await;

    // Shipment happens before anyone watches; those broadcasts go to an
    // empty room and are dropped. The snapshot is the only backfill.
    staff_api
        .update_tracking(
            &OrderId::new("ORD400"),
            &TrackingFields {
                tracking_number: "1Z999".to_owned(),
                carrier: "DHL".to_owned(),
                tracking_url: None,
                estimated_delivery: None,
            },
        )
        .await
        .expect("set tracking");
    staff_api
        .append_tracking_event(&OrderId::new("ORD400"), "Recibido en bodega")
        .await
        .expect("append first event");

    let owner = manager_for(&server, "CLI-1", Role::Cliente);
    let mut owner_messages = owner.subscribe_messages();
    join_room(&owner, &mut owner_messages, "ORD400").await;

    let view = OrderTrackingView::attach(&owner, OrderId::new("ORD400"), None);
    let customer_api = api_for(&server, "CLI-1", Role::Cliente);
    view.load_snapshot(&customer_api).await;

    let snapshot = view.current();
    assert!(snapshot.fetch_error.is_none());
    assert_eq!(snapshot.estado_pedido, Some(OrderStatus::Pendiente));
    let seguimiento = snapshot.seguimiento.expect("tracking present");
    assert_eq!(seguimiento.history.len(), 1);

    staff_api
        .append_tracking_event(&OrderId::new("ORD400"), "En camino")
        .await
        .expect("append second event");

    wait_until(
        || {
            view.current()
                .seguimiento
                .is_some_and(|s| s.history.len() == 2)
        },
        "live event should extend the view history",
    )
    .await;
    let statuses: Vec<String> = view
        .current()
        .seguimiento
        .expect("tracking present")
        .history
        .iter()
        .map(|event| event.status.clone())
        .collect();
    assert_eq!(statuses, ["Recibido en bodega", "En camino"]);
}
