//! Wire Types
//!
//! Request and response messages of the query surface. The RPC transport
//! itself lives outside this subsystem; these types define the payloads the
//! ingester serves and the querier merges. Trace IDs travel as 16 raw bytes
//! in requests and as lowercase hex in search metadata.

use crate::search::SearchEntry;
use crate::trace::Trace;
use std::collections::HashMap;

/// Which storage tiers a by-ID query consults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum QueryMode {
    Ingesters = 0,
    Blocks = 1,
    All = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceByIdRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub trace_id: Vec<u8>,

    #[prost(enumeration = "QueryMode", tag = "2")]
    pub query_mode: i32,

    /// Inclusive block UUID range consulted when the store is queried.
    /// Empty strings mean unbounded.
    #[prost(string, tag = "3")]
    pub block_start: String,

    #[prost(string, tag = "4")]
    pub block_end: String,
}

impl TraceByIdRequest {
    pub fn mode(&self) -> QueryMode {
        QueryMode::try_from(self.query_mode).unwrap_or(QueryMode::All)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceByIdResponse {
    #[prost(message, optional, tag = "1")]
    pub trace: Option<Trace>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchRequest {
    /// Conjunction of key=value predicates over the tag multimap.
    #[prost(map = "string, string", tag = "1")]
    pub tags: HashMap<String, String>,

    /// Maximum hits to return; 0 means no limit.
    #[prost(uint32, tag = "2")]
    pub limit: u32,

    /// Optional time window (unix nanos); 0 means unbounded.
    #[prost(uint64, tag = "3")]
    pub start: u64,

    #[prost(uint64, tag = "4")]
    pub end: u64,

    #[prost(uint32, tag = "5")]
    pub min_duration_ms: u32,

    #[prost(uint32, tag = "6")]
    pub max_duration_ms: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceSearchMetadata {
    /// Lowercase hex trace ID.
    #[prost(string, tag = "1")]
    pub trace_id: String,

    #[prost(string, tag = "2")]
    pub root_service_name: String,

    #[prost(string, tag = "3")]
    pub root_span_name: String,

    #[prost(uint64, tag = "4")]
    pub start_time_unix_nano: u64,

    #[prost(uint32, tag = "5")]
    pub duration_ms: u32,
}

impl TraceSearchMetadata {
    /// Metadata view of a search entry. The entry must carry its trace ID
    /// (the raw, non-normalized form) or one must be supplied by the caller.
    pub fn from_entry(entry: &SearchEntry, hex_trace_id: String) -> Self {
        let duration_nanos = entry
            .end_time_unix_nano
            .saturating_sub(entry.start_time_unix_nano);
        TraceSearchMetadata {
            trace_id: hex_trace_id,
            root_service_name: entry.root_service_name.clone(),
            root_span_name: entry.root_span_name.clone(),
            start_time_unix_nano: entry.start_time_unix_nano,
            duration_ms: (duration_nanos / 1_000_000) as u32,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchMetrics {
    #[prost(uint32, tag = "1")]
    pub inspected_traces: u32,

    #[prost(uint64, tag = "2")]
    pub inspected_bytes: u64,

    #[prost(uint32, tag = "3")]
    pub inspected_blocks: u32,

    #[prost(uint32, tag = "4")]
    pub skipped_blocks: u32,
}

impl SearchMetrics {
    /// Accumulate another stage's (or replica's) counters into this one.
    pub fn add(&mut self, other: &SearchMetrics) {
        self.inspected_traces += other.inspected_traces;
        self.inspected_bytes += other.inspected_bytes;
        self.inspected_blocks += other.inspected_blocks;
        self.skipped_blocks += other.skipped_blocks;
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchResponse {
    #[prost(message, repeated, tag = "1")]
    pub traces: Vec<TraceSearchMetadata>,

    #[prost(message, optional, tag = "2")]
    pub metrics: Option<SearchMetrics>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchTagsResponse {
    #[prost(string, repeated, tag = "1")]
    pub tag_names: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchTagValuesResponse {
    #[prost(string, repeated, tag = "1")]
    pub tag_values: Vec<String>,
}
