//! Ingester Error Types
//!
//! ## Error Categories
//!
//! ### Push-path rejections
//! - `TraceTooLarge`, `RateLimited`, `MaxLiveTracesExceeded`: reported to the
//!   caller and never mutate state; the distributor decides whether to retry.
//!
//! ### Block lifecycle
//! - `BlockNotFound`: the named completing/complete block is gone (already
//!   cleared, or never existed on this instance).
//!
//! ### I/O
//! - `Wal`: local disk failure on the WAL or block files; surfaced so the
//!   failing operation can be retried by the flush loop.
//! - `Backend`: object-storage failure during flush.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("trace {trace_id} too large: {size} bytes exceeds per-trace limit {max}")]
    TraceTooLarge {
        trace_id: String,
        size: usize,
        max: usize,
    },

    #[error("ingest rate limit exceeded for tenant {tenant}")]
    RateLimited { tenant: String },

    #[error("live trace limit reached: {max}")]
    MaxLiveTracesExceeded { max: usize },

    #[error("block {0} not found")]
    BlockNotFound(Uuid),

    #[error(transparent)]
    Model(#[from] tracehouse_core::Error),

    #[error(transparent)]
    Backend(#[from] tracehouse_backend::BackendError),

    #[error("wal: {0}")]
    Wal(#[from] std::io::Error),
}
