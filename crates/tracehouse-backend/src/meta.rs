//! Block Meta Side-File
//!
//! Each sealed block carries a small JSON `meta` object beside its data and
//! index: enough for a reader to decide whether the block can answer a query
//! without touching the data itself.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracehouse_core::Encoding;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: Uuid,
    pub tenant_id: String,

    /// Payload serialization of every record in the block.
    pub encoding: Encoding,

    /// Time bounds over the block's traces, unix nanos. Zero when the block
    /// carries no timing information.
    pub min_time_unix_nano: u64,
    pub max_time_unix_nano: u64,

    pub total_traces: u32,

    /// Size of the data object in bytes.
    pub size_bytes: u64,
}

impl BlockMeta {
    pub fn to_json(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// True when the block's time bounds intersect `[start, end]`. Zero
    /// request bounds are unbounded; blocks without timing always match.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        if self.min_time_unix_nano == 0 && self.max_time_unix_nano == 0 {
            return true;
        }
        let after_start = end == 0 || self.min_time_unix_nano <= end;
        let before_end = start == 0 || self.max_time_unix_nano >= start;
        after_start && before_end
    }
}
