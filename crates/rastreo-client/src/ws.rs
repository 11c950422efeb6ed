use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rastreo_protocol::wire::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::transport::{SocketConnection, SocketStream, SocketTransport};

/// Production transport over a WebSocket. The bearer token travels as a
/// `token` query parameter because browser sockets cannot set headers, and
/// the server accepts both forms.
pub struct WebSocketTransport;

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self, url: &str, token: Option<&str>) -> ClientResult<SocketStream> {
        let mut target =
            Url::parse(url).map_err(|err| ClientError::Transport(err.to_string()))?;
        if let Some(token) = token {
            target.query_pairs_mut().append_pair("token", token);
        }

        let (stream, _response) = connect_async(target.as_str())
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketConnection for WebSocketConnection {
    async fn send(&mut self, message: ClientMessage) -> ClientResult<()> {
        let payload = serde_json::to_string(&message)
            .map_err(|err| ClientError::Malformed(err.to_string()))?;
        self.stream
            .send(Message::Text(payload))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }

    async fn next_message(&mut self) -> ClientResult<Option<ServerMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(raw))) => match ServerMessage::from_json(&raw) {
                    Ok(message) => return Ok(Some(message)),
                    Err(error) => {
                        // Tolerate frames this client version does not know.
                        tracing::warn!(%error, "ignoring unrecognized server frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(ClientError::Transport(err.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
