use std::time::Duration;

/// Machine readable cause, so callers branch on kind instead of matching messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    IdempotencyConflict,
    TransientStorageFailure,
    PublishFailure,
}

#[derive(thiserror::Error, Debug)]
pub enum StockError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("idempotency key {key:?} was already used for a different request on {endpoint}")]
    IdempotencyConflict { key: String, endpoint: String },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("storage task failed: {0}")]
    TaskFailed(String),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("broker rejected message on {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

impl StockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StockError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            StockError::IdempotencyConflict { .. } => ErrorKind::IdempotencyConflict,
            StockError::Publish(_) => ErrorKind::PublishFailure,
            StockError::Storage(_)
            | StockError::Timeout(_)
            | StockError::Corrupt(_)
            | StockError::Encode(_)
            | StockError::TaskFailed(_) => ErrorKind::TransientStorageFailure,
        }
    }
    /// True when resending the same request may succeed. A corrupt row or a value
    /// that cannot be encoded fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            StockError::Corrupt(_) | StockError::Encode(_) => false,
            _ => matches!(
                self.kind(),
                ErrorKind::TransientStorageFailure | ErrorKind::PublishFailure
            ),
        }
    }
    pub fn invalid(msg: impl Into<String>) -> Self {
        StockError::InvalidRequest(msg.into())
    }
}

impl From<minicbor::decode::Error> for StockError {
    fn from(value: minicbor::decode::Error) -> Self {
        StockError::Corrupt(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for StockError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        StockError::Encode(value.to_string())
    }
}

impl From<serde_json::Error> for StockError {
    fn from(value: serde_json::Error) -> Self {
        StockError::Encode(value.to_string())
    }
}

impl From<sled::transaction::TransactionError<StockError>> for StockError {
    fn from(value: sled::transaction::TransactionError<StockError>) -> Self {
        match value {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => StockError::Storage(e),
        }
    }
}

pub type Result<T, E = StockError> = std::result::Result<T, E>;
