use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rastreo_protocol::ids::OrderId;
use rastreo_protocol::wire::{ClientMessage, ServerMessage};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::state::{ConnectionState, CONNECT_TIMEOUT, MAX_CONNECT_ATTEMPTS, RETRY_BACKOFF};
use crate::transport::SocketTransport;

const DEFAULT_MESSAGE_BUFFER: usize = 256;
const OUTBOUND_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    Info,
    Warning,
}

/// Non-blocking user notification surfaced by the manager. The embedding UI
/// renders it as a toast; `auto_dismiss` notices need no user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub message: String,
    pub auto_dismiss: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    pub url: String,
    pub token: Option<String>,
    pub max_connect_attempts: u32,
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub message_buffer: usize,
}

impl ConnectionManagerConfig {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            max_connect_attempts: MAX_CONNECT_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
            connect_timeout: CONNECT_TIMEOUT,
            message_buffer: DEFAULT_MESSAGE_BUFFER,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

struct ManagerShared {
    state: RwLock<ConnectionState>,
    messages: broadcast::Sender<ServerMessage>,
    notices: broadcast::Sender<Notice>,
    unavailable_notice_sent: AtomicBool,
    joined_rooms: Mutex<Vec<OrderId>>,
}

impl ManagerShared {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().expect("connection state lock poisoned");
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "realtime connection transition");
        }
        *state = next;
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("connection state lock poisoned")
    }

    fn rooms(&self) -> Vec<OrderId> {
        self.joined_rooms
            .lock()
            .expect("joined rooms lock poisoned")
            .clone()
    }

    fn remember_room(&self, order_id: &OrderId) {
        let mut rooms = self
            .joined_rooms
            .lock()
            .expect("joined rooms lock poisoned");
        if !rooms.contains(order_id) {
            rooms.push(order_id.clone());
        }
    }

    fn emit_unavailable_notice(&self) {
        if self.unavailable_notice_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.notices.send(Notice {
            severity: NoticeSeverity::Info,
            message: "Actualizaciones en tiempo real no disponibles; se muestran los últimos datos consultados.".to_owned(),
            auto_dismiss: true,
        });
    }
}

/// One resilient realtime session per embedding UI.
///
/// Owns a supervision task that dials through the transport, retries with a
/// fixed backoff up to the attempt cap, and feeds inbound messages into a
/// broadcast that per-order views subscribe to. After the final failed
/// attempt the session is permanently unavailable: the transport is closed,
/// a single auto-dismissing notice is emitted, and no further retry ever
/// fires. Consumers keep working from REST snapshots.
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    supervisor: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn connect(transport: Arc<dyn SocketTransport>, config: ConnectionManagerConfig) -> Self {
        let (messages, _) = broadcast::channel(config.message_buffer.max(1));
        let (notices, _) = broadcast::channel(8);
        let shared = Arc::new(ManagerShared {
            state: RwLock::new(ConnectionState::initial()),
            messages,
            notices,
            unavailable_notice_sent: AtomicBool::new(false),
            joined_rooms: Mutex::new(Vec::new()),
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(run_supervisor(
            Arc::clone(&shared),
            transport,
            config,
            outbound_rx,
        ));

        Self {
            shared,
            outbound_tx,
            supervisor,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    /// False once the retry budget is spent for good.
    pub fn socket_available(&self) -> bool {
        self.shared.state().is_available()
    }

    /// Joins the broadcast room for `order_id`. Silently ignored unless the
    /// session is currently connected and still available, so callers never
    /// need to branch on connectivity. Joined rooms are re-joined
    /// automatically after a reconnect.
    pub fn join_order_room(&self, order_id: &OrderId) {
        let state = self.shared.state();
        if !state.is_connected() || !state.is_available() {
            tracing::debug!(order = %order_id, state = ?state, "join skipped; socket not ready");
            return;
        }
        self.shared.remember_room(order_id);
        let _ = self.outbound_tx.send(ClientMessage::JoinOrderRoom {
            pedido_id: order_id.clone(),
        });
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ServerMessage> {
        self.shared.messages.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

async fn run_supervisor(
    shared: Arc<ManagerShared>,
    transport: Arc<dyn SocketTransport>,
    config: ConnectionManagerConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
) {
    let mut state = ConnectionState::initial();
    shared.set_state(state);

    loop {
        let attempt = timeout(
            config.connect_timeout,
            transport.connect(&config.url, config.token.as_deref()),
        )
        .await;
        let connection = match attempt {
            Ok(Ok(connection)) => Some(connection),
            Ok(Err(error)) => {
                tracing::debug!(%error, "realtime connect failed");
                None
            }
            Err(_elapsed) => {
                tracing::debug!("realtime connect timed out");
                None
            }
        };

        match connection {
            Some(mut connection) => {
                state = state.on_connected();
                shared.set_state(state);

                let mut healthy = true;
                for room in shared.rooms() {
                    if connection
                        .send(ClientMessage::JoinOrderRoom { pedido_id: room })
                        .await
                        .is_err()
                    {
                        healthy = false;
                        break;
                    }
                }

                while healthy {
                    while let Ok(message) = outbound_rx.try_recv() {
                        if connection.send(message).await.is_err() {
                            healthy = false;
                            break;
                        }
                    }
                    if !healthy {
                        break;
                    }
                    match timeout(OUTBOUND_POLL_INTERVAL, connection.next_message()).await {
                        Err(_elapsed) => continue,
                        Ok(Ok(Some(message))) => {
                            let _ = shared.messages.send(message);
                        }
                        Ok(Ok(None)) => healthy = false,
                        Ok(Err(error)) => {
                            tracing::debug!(%error, "realtime stream failed");
                            healthy = false;
                        }
                    }
                }

                connection.close().await;
                state = state.on_connection_lost();
                shared.set_state(state);
            }
            None => {
                state = state.on_connect_failure(config.max_connect_attempts);
                shared.set_state(state);
                if state.is_terminal() {
                    shared.emit_unavailable_notice();
                    return;
                }
            }
        }

        sleep(config.retry_backoff).await;
        state = state.on_retry();
        shared.set_state(state);
    }
}
