use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The session never came up. Nothing to close.
    Startup,
    /// The byte stream can no longer be trusted. Close the session.
    Protocol,
    /// A well-formed request the driver could not satisfy.
    Operation,
    Resource,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no such driver: {0}")]
    UnknownDriver(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("could not start driver: {0}")]
    Startup(String),
    #[error("driver handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("driver did not answer {0} in time")]
    Timeout(&'static str),
    #[error("session is broken and must be closed")]
    BrokenSession,

    #[error("procedure {procedure} failed")]
    Failed { procedure: &'static str },
    #[error("driver does not implement procedure {0}")]
    NoProcedure(i32),
    #[error("token not found: {0}")]
    TokenNotFound(i32),
    #[error("cursor not scrollable")]
    NotScrollable,
    #[error("cursor access mode does not allow {0}")]
    WrongAccess(&'static str),
    #[error("{0} needs a cursor positioned on a row")]
    NoCurrentRow(&'static str),
    #[error("no columns are flagged for update")]
    NothingToUpdate,
    #[error("no such column: {0}")]
    NoSuchColumn(String),
    #[error("row does not match descriptor: {0}")]
    RowMismatch(String),
    #[error("cursor belongs to another session")]
    ForeignCursor,
    #[error("backend error: {0}")]
    Backend(String),

    #[error("token table exhausted")]
    TokensExhausted,
}

impl RpcError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::UnknownDriver(_)
            | RpcError::Catalog(_)
            | RpcError::Startup(_)
            | RpcError::Handshake(_) => ErrorCategory::Startup,
            RpcError::Protocol(_)
            | RpcError::Io(_)
            | RpcError::Timeout(_)
            | RpcError::BrokenSession => ErrorCategory::Protocol,
            RpcError::TokensExhausted => ErrorCategory::Resource,
            _ => ErrorCategory::Operation,
        }
    }

    /// Whether the session that produced this error can keep being used.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Operation | ErrorCategory::Resource
        )
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        RpcError::Protocol(msg.into())
    }
}
