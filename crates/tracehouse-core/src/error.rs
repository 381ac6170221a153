//! Model Error Types
//!
//! Errors raised while decoding or combining trace payloads. All operations
//! in this crate return `Result<T>` aliased to `Result<T, Error>` so callers
//! can propagate with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid trace id: expected {expected} bytes, got {got}")]
    InvalidTraceId { expected: usize, got: usize },

    #[error("invalid trace id hex: {0}")]
    InvalidTraceIdHex(String),

    #[error("payload decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
}
