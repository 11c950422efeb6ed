use std::sync::Arc;

use rastreo_hub::TrackingHub;
use rastreo_store::TrackingStore;
use tokio::sync::{Mutex, Notify};

use crate::auth::TokenVerifier;

/// Shared handles for route handlers, the WebSocket endpoint, and the
/// outbox dispatcher. Built once at startup; the hub and store are injected
/// everywhere by reference rather than reached through globals.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<TrackingStore>>,
    pub hub: Arc<TrackingHub>,
    pub verifier: Arc<TokenVerifier>,
    /// Wakes the outbox dispatcher right after a write commits.
    pub outbox_notify: Arc<Notify>,
}
