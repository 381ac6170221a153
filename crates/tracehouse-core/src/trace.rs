//! Trace Payloads and the Combine Operator
//!
//! A trace fragment moves through the system as opaque bytes plus an
//! [`Encoding`] naming its serialization. The combine operator is the only
//! code that decodes fragments: it merges two fragments of the same trace,
//! collapsing duplicate spans by span ID. Because the distributor writes to
//! N replicas and redelivers on failure, the same span can arrive several
//! times through several paths; the operator must be associative and
//! commutative up to that duplicate elimination.

use crate::error::Result;
use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single span within a trace fragment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Span {
    /// 8-byte span identifier, unique within the trace.
    #[prost(bytes = "vec", tag = "1")]
    pub span_id: Vec<u8>,

    /// Operation name.
    #[prost(string, tag = "2")]
    pub name: String,

    /// Name of the service that emitted this span.
    #[prost(string, tag = "3")]
    pub service_name: String,

    #[prost(uint64, tag = "4")]
    pub start_time_unix_nano: u64,

    #[prost(uint64, tag = "5")]
    pub end_time_unix_nano: u64,

    /// String-valued span attributes.
    #[prost(map = "string, string", tag = "6")]
    pub tags: ::std::collections::HashMap<String, String>,
}

/// A trace fragment: the unit of payload pushed by clients and stored in
/// blocks. A full trace is the combination of all of its fragments.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trace {
    #[prost(message, repeated, tag = "1")]
    pub spans: Vec<Span>,
}

/// Serialization of a trace payload. Carried alongside the bytes wherever
/// fragments travel so readers can decode without sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Proto,
}

impl Encoding {
    pub fn decode(&self, bytes: &[u8]) -> Result<Trace> {
        match self {
            Encoding::Proto => Ok(Trace::decode(bytes)?),
        }
    }

    pub fn encode(&self, trace: &Trace) -> Bytes {
        match self {
            Encoding::Proto => Bytes::from(trace.encode_to_vec()),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Proto => f.write_str("proto"),
        }
    }
}

/// Combine two decoded traces, collapsing duplicate spans by span ID.
///
/// `existing == None` starts a fresh combination (still deduplicated, since
/// a single fragment can already contain redelivered spans). Returns the
/// combined trace and its span count. First occurrence of a span ID wins, so
/// the operation is idempotent: combining a trace with itself is a no-op.
pub fn combine_trace_protos(existing: Option<Trace>, incoming: &Trace) -> (Trace, usize) {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut spans = Vec::new();

    let base = existing.map(|t| t.spans).unwrap_or_default();
    for span in base.into_iter().chain(incoming.spans.iter().cloned()) {
        if seen.insert(span.span_id.clone()) {
            spans.push(span);
        }
    }

    let count = spans.len();
    (Trace { spans }, count)
}

/// Combine two serialized fragments, re-encoding with the first fragment's
/// encoding. `a == None` passes `b` through re-encoded (normalizing it).
pub fn combine_trace_bytes(
    a: Option<&[u8]>,
    b: &[u8],
    enc_a: Encoding,
    enc_b: Encoding,
) -> Result<(Bytes, Encoding)> {
    let incoming = enc_b.decode(b)?;
    let (existing, out_enc) = match a {
        Some(bytes) => (Some(enc_a.decode(bytes)?), enc_a),
        None => (None, enc_b),
    };
    let (combined, _) = combine_trace_protos(existing, &incoming);
    Ok((out_enc.encode(&combined), out_enc))
}

/// Sort spans by start time, then span ID, for deterministic comparisons.
pub fn sort_trace(trace: &mut Trace) {
    trace
        .spans
        .sort_by(|a, b| (a.start_time_unix_nano, &a.span_id).cmp(&(b.start_time_unix_nano, &b.span_id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn make_span(span_id: u8, start: u64) -> Span {
        Span {
            span_id: vec![span_id; 8],
            name: format!("span-{}", span_id),
            service_name: "svc".to_string(),
            start_time_unix_nano: start,
            end_time_unix_nano: start + 1_000,
            tags: Default::default(),
        }
    }

    fn make_trace(span_ids: &[u8]) -> Trace {
        Trace {
            spans: span_ids.iter().map(|&id| make_span(id, id as u64)).collect(),
        }
    }

    #[test]
    fn test_combine_dedupes_by_span_id() {
        let a = make_trace(&[1, 2, 3]);
        let b = make_trace(&[3, 4]);

        let (combined, count) = combine_trace_protos(Some(a), &b);
        assert_eq!(count, 4);
        assert_eq!(combined.spans.len(), 4);
    }

    #[test]
    fn test_combine_is_idempotent() {
        let x = make_trace(&[1, 2]);
        let y = make_trace(&[2, 3]);

        let (xy, _) = combine_trace_protos(Some(x.clone()), &y);
        let (xxy, _) = combine_trace_protos(Some(x), &xy);

        let mut left = xy;
        let mut right = xxy;
        sort_trace(&mut left);
        sort_trace(&mut right);
        assert_eq!(left, right);
    }

    #[test]
    fn test_combine_is_commutative_up_to_order() {
        let a = make_trace(&[1, 2, 5]);
        let b = make_trace(&[2, 3]);

        let (mut ab, _) = combine_trace_protos(Some(a.clone()), &b);
        let (mut ba, _) = combine_trace_protos(Some(b), &a);
        sort_trace(&mut ab);
        sort_trace(&mut ba);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_combine_bytes_round_trip() {
        let a = make_trace(&[1, 2]);
        let b = make_trace(&[2, 3]);
        let a_bytes = Encoding::Proto.encode(&a);
        let b_bytes = Encoding::Proto.encode(&b);

        let (combined_bytes, enc) = combine_trace_bytes(
            Some(&a_bytes),
            &b_bytes,
            Encoding::Proto,
            Encoding::Proto,
        )
        .unwrap();
        assert_eq!(enc, Encoding::Proto);

        let combined = enc.decode(&combined_bytes).unwrap();
        assert_eq!(combined.spans.len(), 3);
    }

    #[test]
    fn test_combine_none_passes_through() {
        let b = make_trace(&[7]);
        let b_bytes = Encoding::Proto.encode(&b);
        let (out, enc) =
            combine_trace_bytes(None, &b_bytes, Encoding::Proto, Encoding::Proto).unwrap();
        assert_eq!(enc.decode(&out).unwrap(), b);
    }

    #[test]
    fn test_random_span_ids_survive_combination() {
        let mut rng = rand::thread_rng();
        let mut trace = Trace { spans: vec![] };
        for _ in 0..32 {
            let mut id = vec![0u8; 8];
            rng.fill_bytes(&mut id);
            trace.spans.push(Span {
                span_id: id,
                ..make_span(0, 0)
            });
        }
        let (combined, count) = combine_trace_protos(None, &trace);
        assert_eq!(count, combined.spans.len());
    }
}
