use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown order status: {0}")]
    UnknownStatus(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
