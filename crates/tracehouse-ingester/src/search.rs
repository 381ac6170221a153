//! Local Search Engine
//!
//! A search request is a conjunction of `key=value` predicates over the tag
//! multimap, with optional duration bounds and a hit limit. The engine
//! visits stages newest-first (live buffer, head block, completing blocks,
//! complete blocks) and keeps the first occurrence of each trace ID, so the
//! freshest metadata wins.
//!
//! Unsealed stages (live/head/completing) are scanned linearly over raw
//! entry bytes and account their exact byte size. Complete blocks answer
//! through the tag index: a header of tag names, sorted values per name, and
//! posting lists of entry offsets. They account the normalized entry size,
//! which is strictly smaller than the raw form.
//!
//! The reserved [`SECRET_EXHAUSTIVE_SEARCH_TAG`] key disables the limit
//! short-circuit so every entry is visited; inspection metrics then reflect
//! the full data set.

use crate::block::CompleteBlock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracehouse_core::{
    SearchEntry, SearchMetrics, SearchRequest, SearchResponse, TraceSearchMetadata,
    SECRET_EXHAUSTIVE_SEARCH_TAG,
};
use tracing::warn;

/// Sealed-block search index: tag name → sorted values → posting list of
/// entry offsets. Built once at block completion, immutable after.
#[derive(Debug, Default)]
pub struct TagIndex {
    tags: BTreeMap<String, BTreeMap<String, Vec<u32>>>,
}

impl TagIndex {
    /// Entries are inserted in ascending order during the build, so posting
    /// lists stay sorted without a separate pass.
    pub fn insert(&mut self, key: &str, value: &str, entry: u32) {
        let postings = self
            .tags
            .entry(key.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default();
        if postings.last() != Some(&entry) {
            postings.push(entry);
        }
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &String> {
        self.tags.keys()
    }

    pub fn tag_values(&self, key: &str) -> impl Iterator<Item = &String> {
        self.tags.get(key).into_iter().flat_map(|values| values.keys())
    }

    /// Intersected posting list for a predicate set. `None` means some
    /// predicate has no postings at all, so nothing can match. Must not be
    /// called with an empty predicate set (callers scan everything instead).
    pub fn postings(&self, predicates: &HashMap<String, String>) -> Option<Vec<u32>> {
        let mut lists: Vec<&Vec<u32>> = Vec::with_capacity(predicates.len());
        for (key, value) in predicates {
            lists.push(self.tags.get(key)?.get(value)?);
        }
        lists.sort_by_key(|l| l.len());

        let (smallest, rest) = lists.split_first()?;
        let hits = smallest
            .iter()
            .copied()
            .filter(|entry| rest.iter().all(|list| list.binary_search(entry).is_ok()))
            .collect();
        Some(hits)
    }
}

/// One search pass: accumulates matches and inspection metrics across the
/// stages the instance feeds it.
pub struct Searcher {
    predicates: HashMap<String, String>,
    limit: usize,
    exhaustive: bool,
    min_duration_ms: u32,
    max_duration_ms: u32,
    seen: HashSet<String>,
    results: Vec<TraceSearchMetadata>,
    pub metrics: SearchMetrics,
}

impl Searcher {
    pub fn new(req: &SearchRequest) -> Self {
        Self {
            predicates: req.tags.clone(),
            limit: req.limit as usize,
            exhaustive: req.tags.contains_key(SECRET_EXHAUSTIVE_SEARCH_TAG),
            min_duration_ms: req.min_duration_ms,
            max_duration_ms: req.max_duration_ms,
            seen: HashSet::new(),
            results: Vec::new(),
            metrics: SearchMetrics::default(),
        }
    }

    pub fn limit_reached(&self) -> bool {
        !self.exhaustive && self.limit > 0 && self.results.len() >= self.limit
    }

    fn entry_matches(&self, entry: &SearchEntry) -> bool {
        if !entry.matches(&self.predicates) {
            return false;
        }
        let duration_ms = (entry
            .end_time_unix_nano
            .saturating_sub(entry.start_time_unix_nano)
            / 1_000_000) as u32;
        if self.min_duration_ms > 0 && duration_ms < self.min_duration_ms {
            return false;
        }
        if self.max_duration_ms > 0 && duration_ms > self.max_duration_ms {
            return false;
        }
        true
    }

    fn record_match(&mut self, entry: &SearchEntry) {
        let hex = hex_of(&entry.trace_id);
        if self.seen.insert(hex.clone()) {
            self.results.push(TraceSearchMetadata::from_entry(entry, hex));
        }
    }

    /// Scan one raw (live/head/completing) entry, accounting its exact size.
    pub fn visit_raw_entry(&mut self, bytes: &[u8]) {
        self.metrics.inspected_traces += 1;
        self.metrics.inspected_bytes += bytes.len() as u64;

        match SearchEntry::decode_bytes(bytes) {
            Ok(entry) => {
                if self.entry_matches(&entry) {
                    self.record_match(&entry);
                }
            }
            Err(err) => warn!(error = %err, "skipping undecodable search entry"),
        }
    }

    /// Search one complete block through its tag index.
    pub fn visit_complete_block(&mut self, block: &CompleteBlock) {
        self.metrics.inspected_blocks += 1;

        if self.exhaustive || self.predicates.is_empty() {
            for indexed in block.entries() {
                if self.limit_reached() {
                    return;
                }
                self.metrics.inspected_traces += 1;
                self.metrics.inspected_bytes += indexed.norm_len as u64;
                if self.entry_matches(&indexed.entry) {
                    self.record_match(&indexed.entry);
                }
            }
            return;
        }

        let Some(postings) = block.tag_index().postings(&self.predicates) else {
            return;
        };
        for idx in postings {
            if self.limit_reached() {
                return;
            }
            let indexed = &block.entries()[idx as usize];
            self.metrics.inspected_traces += 1;
            self.metrics.inspected_bytes += indexed.norm_len as u64;
            if self.entry_matches(&indexed.entry) {
                self.record_match(&indexed.entry);
            }
        }
    }

    pub fn into_response(self) -> SearchResponse {
        SearchResponse {
            traces: self.results,
            metrics: Some(self.metrics),
        }
    }
}

pub(crate) fn hex_of(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}
