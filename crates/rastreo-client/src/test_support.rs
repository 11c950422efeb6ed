use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rastreo_protocol::wire::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::{ClientError, ClientResult};
use crate::transport::{SocketConnection, SocketStream, SocketTransport};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn wait_for(mut predicate: impl FnMut() -> bool, what: &str) {
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

/// Test-side handle to one scripted connection: feed inbound messages,
/// inspect what the client sent, or drop the link.
pub struct MockRemote {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<ServerMessage>>>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl MockRemote {
    pub fn push(&self, message: ServerMessage) {
        let tx = self.inbound_tx.lock().expect("mock remote lock poisoned");
        if let Some(tx) = tx.as_ref() {
            tx.send(message).expect("mock connection is gone");
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().expect("mock sent lock poisoned").clone()
    }

    /// Simulates the transport dropping: the client observes an orderly
    /// close on its next read.
    pub fn disconnect(&self) {
        let mut tx = self.inbound_tx.lock().expect("mock remote lock poisoned");
        tx.take();
    }
}

struct MockConnection {
    inbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

#[async_trait]
impl SocketConnection for MockConnection {
    async fn send(&mut self, message: ClientMessage) -> ClientResult<()> {
        self.sent
            .lock()
            .expect("mock sent lock poisoned")
            .push(message);
        Ok(())
    }

    async fn next_message(&mut self) -> ClientResult<Option<ServerMessage>> {
        Ok(self.inbound_rx.recv().await)
    }

    async fn close(&mut self) {
        self.inbound_rx.close();
    }
}

/// Scripted transport: hands out the prepared connections in order, then
/// fails every further dial.
pub struct MockTransport {
    pub connect_calls: AtomicUsize,
    streams: Mutex<VecDeque<SocketStream>>,
}

impl MockTransport {
    pub fn with_connections(count: usize) -> (Self, Vec<MockRemote>) {
        let mut streams: VecDeque<SocketStream> = VecDeque::new();
        let mut remotes = Vec::new();
        for _ in 0..count {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            streams.push_back(Box::new(MockConnection {
                inbound_rx,
                sent: Arc::clone(&sent),
            }));
            remotes.push(MockRemote {
                inbound_tx: Mutex::new(Some(inbound_tx)),
                sent,
            });
        }
        (
            Self {
                connect_calls: AtomicUsize::new(0),
                streams: Mutex::new(streams),
            },
            remotes,
        )
    }
}

#[async_trait]
impl SocketTransport for MockTransport {
    async fn connect(&self, _url: &str, _token: Option<&str>) -> ClientResult<SocketStream> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut streams = self.streams.lock().expect("mock streams lock poisoned");
        streams
            .pop_front()
            .ok_or_else(|| ClientError::Transport("mock transport refused the dial".to_owned()))
    }
}
