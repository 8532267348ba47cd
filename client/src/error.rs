use protocol::ProtocolError;
use thiserror::Error;
use tokio::sync::mpsc;

/// Helper alias for Result
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown route '{0}'")]
    UnknownRoute(String),

    #[error("route '{0}' has no presence channel")]
    NotPresence(String),

    #[error("not subscribed to channel '{0}'")]
    NotSubscribed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authorization rejected: {0}")]
    Authorization(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("contract error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("event channel closed")]
    ChannelClosed,
}

/// Helper to convert channel send errors.
impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}
