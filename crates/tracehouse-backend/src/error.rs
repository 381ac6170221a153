//! Backend Error Types
//!
//! `DoesNotExist` is a sentinel: callers match on it to distinguish "object
//! missing" from real failures, so the `From` impl below translates the
//! store's not-found variant instead of wrapping it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object does not exist")]
    DoesNotExist,

    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed block meta: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("malformed trace index: {0}")]
    Index(String),

    #[error("invalid block id: {0}")]
    InvalidBlockId(#[from] uuid::Error),
}

impl From<object_store::Error> for BackendError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BackendError::DoesNotExist,
            other => BackendError::ObjectStore(other),
        }
    }
}
