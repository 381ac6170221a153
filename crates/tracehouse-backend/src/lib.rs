//! Object Storage Backend
//!
//! This crate is the boundary between tracehouse and object storage. It
//! exposes three things:
//!
//! 1. **Raw access** ([`RawReader`] / [`RawWriter`]): put, ranged get,
//!    hierarchical list, and *append* via staged-block commit
//! 2. **Hedged reads**: reads may issue a second identical request after a
//!    short delay and take the faster response, clipping tail latency
//! 3. **The block store** ([`Store`]): uploads sealed blocks as
//!    `tenant/<tenant>/<uuid>/{data, index, meta}` and answers point lookups
//!    against them
//!
//! ## Append contract
//!
//! `append` is a staged upload. The first call (no tracker) writes the first
//! block and returns an opaque [`AppendTracker`] naming the object. Every
//! later call stages one more block and commits the full list atomically.
//! Block IDs are base-64 strings derived from the 1-based block index as a
//! little-endian u32 in a 64-byte buffer, so all IDs share one length.
//! After any successful `append` the object reads back as the in-order
//! concatenation of every block so far. `close_append` is a no-op because
//! each append self-commits.
//!
//! ## Failure mapping
//!
//! A not-found condition from the underlying store becomes the sentinel
//! [`BackendError::DoesNotExist`] and is returned verbatim, never wrapped.
//! Everything else propagates with context.

pub mod backend;
pub mod block_store;
pub mod config;
pub mod error;
pub mod hedged;
pub mod index;
pub mod layout;
pub mod meta;
pub mod raw;

pub use backend::ObjectBackend;
pub use block_store::{FlushableBlock, ObjectBlockStore, Store};
pub use config::BackendConfig;
pub use error::{BackendError, Result};
pub use hedged::HedgedReader;
pub use index::{TraceIndex, TraceIndexEntry};
pub use layout::{block_keypath, object_file_name, tenant_keypath, tenants_keypath, KeyPath};
pub use meta::BlockMeta;
pub use raw::{AppendTracker, RawReader, RawWriter};
