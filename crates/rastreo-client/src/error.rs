use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket transport error: {0}")]
    Transport(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("session expired")]
    SessionExpired,
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
