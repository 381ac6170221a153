//! Per-Tenant Write Path
//!
//! This crate implements the ingester side of tracehouse: everything between
//! a pushed span batch and a sealed block in object storage.
//!
//! ## Write Flow
//!
//! ```text
//! push_bytes(id, payload, search)
//!     ↓
//! LiveTrace              ← in-memory accumulator, one per trace ID
//!     ↓ cut (idle/immediate)
//! HeadBlock + WAL        ← durable on local disk
//!     ↓ cut (size/age)
//! CompletingBlock        ← sealed, immutable
//!     ↓ complete
//! CompleteBlock          ← sorted, indexed, meta recorded
//!     ↓ flush
//! object storage         ← store.write_block
//!     ↓ clear
//! (gone)
//! ```
//!
//! Search runs against all of these stages at once and must stay correct
//! while the state machine advances underneath it; see [`instance`] for the
//! locking discipline that makes that hold.
//!
//! ## Main Components
//!
//! - [`Instance`]: one tenant's state machine (the integration point)
//! - [`Ingester`]: instance lifecycle, WAL replay, flush loop
//! - [`Limiter`]: per-tenant ingest rate and size limits
//! - [`wal`]: the on-disk log format and replay

pub mod block;
pub mod config;
pub mod error;
pub mod ingester;
pub mod instance;
pub mod limiter;
pub mod search;
pub mod traces;
pub mod wal;

pub use config::IngesterConfig;
pub use error::{Error, Result};
pub use ingester::Ingester;
pub use instance::{Instance, LocalDirs};
pub use limiter::{Limiter, Limits, RingCount, StaticRingCount};
pub use traces::LiveTrace;
pub use wal::{WalFile, WalRecord};
