//! Core Trace Model
//!
//! This crate defines the data model shared by every tracehouse component:
//!
//! 1. **Trace IDs**: 16-byte opaque identifiers, hex-encodable for transport
//! 2. **Trace / Span payloads**: the serialized fragments clients push
//! 3. **Combining**: the idempotent merge operator that reconciles
//!    at-least-once delivery across replicas and storage stages
//! 4. **Search entries**: compact per-trace records carrying tags and times
//! 5. **Wire types**: the request/response messages of the query surface
//!
//! ## Why combining lives here
//!
//! The write path treats payloads as opaque bytes end to end. The only code
//! that ever decodes them is the combine operator, which is needed in three
//! places: the ingester (merging duplicate records at block completion), the
//! querier (merging replica responses), and the store read path. Keeping the
//! operator next to the model means all three agree on its semantics:
//!
//! ```text
//! combine(a, combine(b, c)) == combine(combine(a, b), c)
//! combine(x, combine(x, y)) == combine(x, y)        (modulo span order)
//! ```
//!
//! Duplicate spans (same span ID) are collapsed; this is the sole primitive
//! that masks replica fan-in and redelivery.

pub mod error;
pub mod id;
pub mod search;
pub mod trace;
pub mod wire;

pub use error::{Error, Result};
pub use id::TraceId;
pub use search::{KeyValue, SearchEntry, SECRET_EXHAUSTIVE_SEARCH_TAG};
pub use trace::{combine_trace_bytes, combine_trace_protos, sort_trace, Encoding, Span, Trace};
pub use wire::{
    QueryMode, SearchMetrics, SearchRequest, SearchResponse, SearchTagValuesResponse,
    SearchTagsResponse, TraceByIdRequest, TraceByIdResponse, TraceSearchMetadata,
};
