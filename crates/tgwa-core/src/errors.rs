use std::time::Duration;

use crate::connection::ConnectionState;

/// Core error type for the relay.
///
/// Adapter crates map their transport/store errors into this type so the
/// lifecycle manager and router can apply one failure policy (retry, record as
/// failed delivery, or log and move on).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("initialization timed out after {0:?}")]
    InitializationTimeout(Duration),

    #[error("initialization failed: {0}")]
    InitializationFailure(String),

    #[error("outbound client is not ready (state: {0})")]
    NotReady(ConnectionState),

    #[error("delivery to {destination} failed: {cause}")]
    Delivery { destination: String, cause: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("connection manager has been destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, Error>;
