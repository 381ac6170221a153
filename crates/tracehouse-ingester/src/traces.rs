//! Live Traces
//!
//! A live trace is the in-memory accumulator for one trace ID between its
//! first push and the cut that moves it into the head block. Fragments are
//! kept in arrival order as opaque bytes; nothing decodes them until block
//! completion.

use bytes::Bytes;
use std::time::Instant;
use tracehouse_core::{Encoding, TraceId};

pub struct LiveTrace {
    pub id: TraceId,
    pub encoding: Encoding,

    /// Payload fragments in arrival order.
    pub payloads: Vec<Bytes>,

    /// Search entry bytes in arrival order; empty for unannotated traces.
    pub search_entries: Vec<Bytes>,

    pub last_received: Instant,

    /// Accumulated payload + search bytes, checked against the per-trace
    /// size limit.
    pub total_bytes: usize,
}

impl LiveTrace {
    pub fn new(id: TraceId, encoding: Encoding) -> Self {
        Self {
            id,
            encoding,
            payloads: Vec::new(),
            search_entries: Vec::new(),
            last_received: Instant::now(),
            total_bytes: 0,
        }
    }

    /// Bytes this push would bring the trace to, checked before mutating.
    pub fn size_with(&self, payload: &Bytes, search: Option<&Bytes>) -> usize {
        self.total_bytes + payload.len() + search.map(|s| s.len()).unwrap_or(0)
    }

    pub fn push(&mut self, payload: Bytes, search: Option<Bytes>) {
        self.total_bytes += payload.len() + search.as_ref().map(|s| s.len()).unwrap_or(0);
        self.payloads.push(payload);
        if let Some(search) = search {
            self.search_entries.push(search);
        }
        self.last_received = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_accumulates() {
        let id = TraceId::from_slice(&[1u8; 16]).unwrap();
        let mut trace = LiveTrace::new(id, Encoding::Proto);

        trace.push(Bytes::from(vec![0u8; 10]), Some(Bytes::from(vec![0u8; 4])));
        trace.push(Bytes::from(vec![0u8; 6]), None);

        assert_eq!(trace.payloads.len(), 2);
        assert_eq!(trace.search_entries.len(), 1);
        assert_eq!(trace.total_bytes, 20);
    }

    #[test]
    fn test_size_with_does_not_mutate() {
        let id = TraceId::from_slice(&[1u8; 16]).unwrap();
        let trace = LiveTrace::new(id, Encoding::Proto);
        assert_eq!(trace.size_with(&Bytes::from(vec![0u8; 8]), None), 8);
        assert_eq!(trace.total_bytes, 0);
    }
}
