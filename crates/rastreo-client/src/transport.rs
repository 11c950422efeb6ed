use async_trait::async_trait;
use rastreo_protocol::wire::{ClientMessage, ServerMessage};

use crate::error::ClientResult;

/// One live realtime connection. `next_message` yields `Ok(None)` on an
/// orderly close; transport failures surface as errors.
#[async_trait]
pub trait SocketConnection: Send {
    async fn send(&mut self, message: ClientMessage) -> ClientResult<()>;
    async fn next_message(&mut self) -> ClientResult<Option<ServerMessage>>;
    async fn close(&mut self);
}

pub type SocketStream = Box<dyn SocketConnection>;

/// Dial seam for the connection manager; tests plug in mock transports.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self, url: &str, token: Option<&str>) -> ClientResult<SocketStream>;
}
