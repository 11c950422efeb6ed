use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("order not found: {0}")]
    OrderNotFound(String),
    #[error("order has no tracking state yet: {0}")]
    TrackingNotInitialized(String),
    #[error("cancellation request not found: {0}")]
    RequestNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid stored value: {0}")]
    InvalidStored(String),
    #[error("unsupported schema version: supported {supported}, found {found}")]
    UnsupportedSchemaVersion { supported: u32, found: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;
