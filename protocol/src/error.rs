use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed channel name '{0}'")]
    MalformedChannel(String),

    #[error("invalid route key '{0}': {1}")]
    InvalidRouteKey(String, &'static str),

    #[error("duplicate route key '{0}'")]
    DuplicateRoute(String),

    #[error("member data rejected: {0}")]
    SchemaMismatch(String),

    #[error("auth grant expired")]
    GrantExpired,

    #[error("auth grant signature mismatch")]
    GrantSignature,

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
