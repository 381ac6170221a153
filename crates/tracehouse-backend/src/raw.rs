//! Raw Reader / Writer Traits
//!
//! The minimal surface the rest of the system needs from object storage.
//! Implementations route reads through a hedged handle and writes through a
//! primary handle; see [`crate::backend::ObjectBackend`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Opaque state threaded through a staged append. Identifies the target
/// object and the block IDs committed so far; every ID within one object has
/// the same length by construction.
#[derive(Debug, Clone)]
pub struct AppendTracker {
    pub(crate) name: String,
    pub(crate) committed: Vec<String>,
}

impl AppendTracker {
    /// Fully qualified object name this tracker appends to.
    pub fn object_name(&self) -> &str {
        &self.name
    }

    /// Base-64 block IDs committed so far, in commit order.
    pub fn committed_blocks(&self) -> &[String] {
        &self.committed
    }
}

#[async_trait]
pub trait RawReader: Send + Sync {
    /// Hierarchical listing with `/` as delimiter: returns only the
    /// immediate child prefix names under `keypath`.
    async fn list(&self, keypath: &[String]) -> Result<Vec<String>>;

    /// Full object read, routed through the hedged path.
    async fn read(&self, name: &str, keypath: &[String]) -> Result<Bytes>;

    /// Ranged read filling `dest` from `offset`; reads
    /// `min(dest.len(), object_size - offset)` bytes. Hedged.
    async fn read_range(
        &self,
        name: &str,
        keypath: &[String],
        offset: u64,
        dest: &mut [u8],
    ) -> Result<()>;
}

#[async_trait]
pub trait RawWriter: Send + Sync {
    /// Stream upload of a single object, atomic.
    async fn write(&self, name: &str, keypath: &[String], data: Bytes) -> Result<()>;

    /// Staged upload. `tracker == None` writes the first block and returns a
    /// tracker for the object; later calls stage one more block and commit
    /// the whole list atomically. After any successful call the object reads
    /// back as the concatenation of all blocks so far.
    async fn append(
        &self,
        name: &str,
        keypath: &[String],
        tracker: Option<AppendTracker>,
        buffer: Bytes,
    ) -> Result<AppendTracker>;

    /// No-op: every `append` self-commits.
    async fn close_append(&self, tracker: AppendTracker) -> Result<()>;
}
