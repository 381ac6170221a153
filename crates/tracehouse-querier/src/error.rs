//! Querier Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no healthy replicas available for read")]
    NoHealthyReplicas,

    #[error("too many failed replicas: {failures} failures exceed budget {max_errors}: {last_error}")]
    QuorumFailed {
        failures: usize,
        max_errors: usize,
        last_error: String,
    },

    #[error("ingester client: {0}")]
    Client(String),

    #[error(transparent)]
    Model(#[from] tracehouse_core::Error),

    #[error(transparent)]
    Store(#[from] tracehouse_backend::BackendError),
}
