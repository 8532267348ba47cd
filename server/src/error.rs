use protocol::{ProtocolError, WireError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("procedure failed: {0}")]
    Procedure(String),

    #[error("unknown route '{0}'")]
    UnknownRoute(String),

    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("contract error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("issue accessing file: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Collapses internal detail into the opaque wire shape. The real cause
    /// stays in the logs and never crosses the process boundary.
    pub fn to_wire_error(&self, channel_name: Option<&str>) -> WireError {
        let message = match self {
            Self::Input(_) => "invalid input",
            Self::UnknownRoute(_) => "unknown route",
            Self::Authorization(_) | Self::Protocol(_) => "authorization failed",
            _ => "request failed",
        };

        WireError {
            message: message.to_string(),
            channel_name: channel_name.map(ToString::to_string),
        }
    }
}
