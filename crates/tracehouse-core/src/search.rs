//! Search Entries
//!
//! A search entry is the compact, self-describing record the write path keeps
//! beside each trace so tag queries never have to decode full payloads. One
//! entry carries the trace's time bounds, root names, and a tag multimap
//! (repeated key/value pairs; the same key may appear with many values).
//!
//! Entries are immutable once encoded. Sealed blocks store a *normalized*
//! form with the trace ID stripped (the enclosing record already knows it),
//! which is why inspected-byte counts shrink once a block completes.

use crate::error::Result;
use crate::id::TraceId;
use bytes::Bytes;
use prost::Message;
use std::collections::HashMap;

/// Reserved tag key that forces a search to visit every entry instead of
/// stopping at the request limit. Used by tests and inspection metrics; the
/// key never matches real data.
pub const SECRET_EXHAUSTIVE_SEARCH_TAG: &str = "x-dbg-exhaustive";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchEntry {
    /// Owning trace ID; empty in the normalized (sealed-block) form.
    #[prost(bytes = "vec", tag = "1")]
    pub trace_id: Vec<u8>,

    #[prost(uint64, tag = "2")]
    pub start_time_unix_nano: u64,

    #[prost(uint64, tag = "3")]
    pub end_time_unix_nano: u64,

    #[prost(string, tag = "4")]
    pub root_service_name: String,

    #[prost(string, tag = "5")]
    pub root_span_name: String,

    /// Tag multimap as repeated pairs; duplicate keys are expected.
    #[prost(message, repeated, tag = "6")]
    pub tags: Vec<KeyValue>,
}

impl SearchEntry {
    pub fn new(trace_id: TraceId) -> Self {
        SearchEntry {
            trace_id: trace_id.to_vec(),
            ..Default::default()
        }
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.push(KeyValue {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn encode_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(SearchEntry::decode(bytes)?)
    }

    /// True when every `key=value` predicate in the request is present in the
    /// tag multimap. An empty predicate set matches everything.
    pub fn matches(&self, predicates: &HashMap<String, String>) -> bool {
        predicates.iter().all(|(k, v)| {
            self.tags
                .iter()
                .any(|pair| &pair.key == k && &pair.value == v)
        })
    }

    /// Normalized form for sealed blocks: the trace ID is dropped because the
    /// enclosing record carries it. Strictly smaller than the raw entry.
    pub fn normalized(&self) -> SearchEntry {
        let mut entry = self.clone();
        entry.trace_id = Vec::new();
        entry
    }

    /// Merge several entries for the same trace into one: widest time bounds,
    /// first non-empty root names, deduplicated tag union.
    pub fn merge(entries: &[SearchEntry]) -> Option<SearchEntry> {
        let first = entries.first()?;
        let mut merged = first.clone();
        for entry in &entries[1..] {
            if entry.start_time_unix_nano != 0
                && (merged.start_time_unix_nano == 0
                    || entry.start_time_unix_nano < merged.start_time_unix_nano)
            {
                merged.start_time_unix_nano = entry.start_time_unix_nano;
            }
            if entry.end_time_unix_nano > merged.end_time_unix_nano {
                merged.end_time_unix_nano = entry.end_time_unix_nano;
            }
            if merged.root_service_name.is_empty() {
                merged.root_service_name = entry.root_service_name.clone();
            }
            if merged.root_span_name.is_empty() {
                merged.root_span_name = entry.root_span_name.clone();
            }
            for pair in &entry.tags {
                if !merged.tags.contains(pair) {
                    merged.tags.push(pair.clone());
                }
            }
        }
        Some(merged)
    }
}
