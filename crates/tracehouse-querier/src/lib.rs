//! Query Fan-Out
//!
//! The querier answers reads by fanning a request to every ingester owning a
//! replica of the tenant's shard, in parallel, and to the object store when
//! the query mode asks for history. Results are merged so the caller sees a
//! single response:
//!
//! - **By ID**: partial traces combined with duplicate-span elimination
//! - **Search**: deduplicated by trace ID (first response wins), metrics
//!   summed, sorted by start time descending, truncated to the limit
//! - **Tags / tag values**: set-union, sorted ascending
//!
//! Replica quorum lives in [`ring`]: the fan-out succeeds once
//! `replicas - max_errors` replies are in and fails once the error budget is
//! exceeded, so one slow or dead ingester never fails a read. Requests to
//! the replicas beyond the quorum requirement can be delayed a little
//! (`extra_query_delay`) so they act as hedges instead of extra load.
//!
//! The ring itself (membership, shard ownership) is an external
//! collaborator behind the [`ring::ReadRing`] trait, as is the transport
//! behind [`client::IngesterClient`].

pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod querier;
pub mod ring;

pub use client::IngesterClient;
pub use config::QuerierConfig;
pub use error::{Error, Result};
pub use pool::{ClientFactory, ClientPool};
pub use querier::Querier;
pub use ring::{ReadRing, ReplicaDesc, ReplicaResponse, ReplicationSet, StaticRing};
