use thiserror::Error;

/// Errors produced by the shardlink protocol layer.
#[derive(Debug, Error)]
pub enum ShardLinkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    #[error("handler already registered: {0}")]
    DuplicateHandler(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("no waiter or return path for rtoken {0}")]
    OrphanResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("endpoint closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ShardLinkError {
    fn from(e: serde_json::Error) -> Self {
        ShardLinkError::Codec(e.to_string())
    }
}

pub type ShardLinkResult<T> = Result<T, ShardLinkError>;
