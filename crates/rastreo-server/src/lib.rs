//! HTTP/WebSocket server for the order-tracking service.

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use rastreo_config::RastreoConfig;
use rastreo_hub::{TrackingHub, TrackingHubConfig};
use rastreo_store::TrackingStore;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{Mutex, Notify};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::auth::TokenVerifier;
use crate::error::ServerError;
use crate::state::AppState;

pub fn build_state(config: &RastreoConfig, store: TrackingStore) -> AppState {
    let hub_config = config.hub_runtime();
    let hub = Arc::new(TrackingHub::new(TrackingHubConfig {
        room_buffer_capacity: hub_config.room_buffer_capacity,
        global_buffer_capacity: hub_config.global_buffer_capacity,
    }));
    AppState {
        store: Arc::new(Mutex::new(store)),
        hub,
        verifier: Arc::new(TokenVerifier::new(&config.auth.token_secret)),
        outbox_notify: Arc::new(Notify::new()),
    }
}

pub fn build_router(state: AppState, allowed_origin: &str) -> Router {
    let cors = if allowed_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origin
                    .parse::<HeaderValue>()
                    .unwrap_or_else(|_| HeaderValue::from_static("*")),
            )
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/pedidos", post(routes::create_order))
        .route("/api/pedidos/{id}", get(routes::get_order))
        .route(
            "/api/pedidos/{id}/seguimiento",
            get(routes::tracking_snapshot).put(routes::update_tracking),
        )
        .route("/api/pedidos/{id}/estado", put(routes::update_status))
        .route(
            "/api/pedidos/{id}/seguimiento/evento",
            post(routes::append_tracking_event),
        )
        .route(
            "/api/pedidos/{id}/solicitudes-cancelacion",
            post(routes::submit_cancellation),
        )
        .route(
            "/api/solicitudes-cancelacion",
            get(routes::list_cancellations),
        )
        .route(
            "/api/solicitudes-cancelacion/{id}",
            put(routes::decide_cancellation),
        )
        .layer(cors)
        .with_state(state)
}

pub async fn run(config: RastreoConfig) -> Result<(), ServerError> {
    let store = TrackingStore::open(&config.server.database_path)?;
    let state = build_state(&config, store);

    let dispatcher = dispatcher::spawn(
        Arc::clone(&state.store),
        Arc::clone(&state.hub),
        Arc::clone(&state.outbox_notify),
        config.outbox_runtime(),
    );

    let app = build_router(state, &config.cors.allowed_origin);
    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .map_err(|err| ServerError::Bind(format!("{}: {err}", config.server.bind_addr)))?;
    info!(addr = %config.server.bind_addr, "tracking service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| ServerError::Serve(err.to_string()))?;

    dispatcher.abort();
    info!("tracking service shut down");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}
