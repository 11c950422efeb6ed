//! Native consumer side of the order-tracking service: a resilient realtime
//! connection with bounded reconnect, per-order view models, and the
//! employee-facing management operations over the REST API.

pub mod api;
pub mod error;
pub mod management;
pub mod manager;
pub mod state;
#[cfg(test)]
mod test_support;
pub mod transport;
pub mod view;
pub mod ws;

pub use api::ApiClient;
pub use error::{ClientError, ClientResult};
pub use management::{OperationFailure, OrderManagement};
pub use manager::{ConnectionManager, ConnectionManagerConfig, Notice, NoticeSeverity};
pub use state::ConnectionState;
pub use transport::{SocketConnection, SocketStream, SocketTransport};
pub use view::OrderTrackingView;
pub use ws::WebSocketTransport;
