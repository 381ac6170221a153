//! Trace Index Side-File
//!
//! The `index` object of a sealed block maps trace IDs to byte ranges in the
//! `data` object. Entries are fixed-width and sorted by trace ID so lookups
//! are a binary search over a ranged read, with no decoding.
//!
//! ```text
//! entry := trace_id (16) | offset u64 LE (8) | len u32 LE (4)     28 bytes
//! file  := entry *
//! ```

use crate::error::{BackendError, Result};
use bytes::Bytes;
use tracehouse_core::TraceId;

const ENTRY_WIDTH: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceIndexEntry {
    pub trace_id: TraceId,
    pub offset: u64,
    pub len: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TraceIndex {
    entries: Vec<TraceIndexEntry>,
}

impl TraceIndex {
    /// Build from entries already sorted by trace ID (the block builder
    /// streams records in sorted order).
    pub fn from_sorted(entries: Vec<TraceIndexEntry>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].trace_id <= w[1].trace_id));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, trace_id: TraceId) -> Option<TraceIndexEntry> {
        self.entries
            .binary_search_by(|e| e.trace_id.cmp(&trace_id))
            .ok()
            .map(|i| self.entries[i])
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.entries.len() * ENTRY_WIDTH);
        for entry in &self.entries {
            buf.extend_from_slice(entry.trace_id.as_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.len.to_le_bytes());
        }
        Bytes::from(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % ENTRY_WIDTH != 0 {
            return Err(BackendError::Index(format!(
                "length {} is not a multiple of the entry width",
                bytes.len()
            )));
        }

        let mut entries = Vec::with_capacity(bytes.len() / ENTRY_WIDTH);
        for chunk in bytes.chunks_exact(ENTRY_WIDTH) {
            let trace_id = TraceId::from_slice(&chunk[..16])
                .map_err(|e| BackendError::Index(e.to_string()))?;
            let offset = u64::from_le_bytes(chunk[16..24].try_into().unwrap());
            let len = u32::from_le_bytes(chunk[24..28].try_into().unwrap());
            entries.push(TraceIndexEntry {
                trace_id,
                offset,
                len,
            });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> TraceId {
        TraceId::from_slice(&[byte; 16]).unwrap()
    }

    #[test]
    fn test_encode_decode_find() {
        let index = TraceIndex::from_sorted(vec![
            TraceIndexEntry {
                trace_id: id(1),
                offset: 0,
                len: 10,
            },
            TraceIndexEntry {
                trace_id: id(2),
                offset: 10,
                len: 20,
            },
            TraceIndexEntry {
                trace_id: id(9),
                offset: 30,
                len: 5,
            },
        ]);

        let decoded = TraceIndex::decode(&index.encode()).unwrap();
        assert_eq!(decoded.len(), 3);

        let hit = decoded.find(id(2)).unwrap();
        assert_eq!(hit.offset, 10);
        assert_eq!(hit.len, 20);
        assert!(decoded.find(id(3)).is_none());
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let index = TraceIndex::from_sorted(vec![TraceIndexEntry {
            trace_id: id(1),
            offset: 0,
            len: 1,
        }]);
        let bytes = index.encode();
        assert!(TraceIndex::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
