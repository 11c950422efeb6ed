//! Order, tracking, and outbox persistence over SQLite.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::TrackingStore;
pub use types::{NewOrder, OutboxEntry};
