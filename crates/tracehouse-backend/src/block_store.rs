//! Block Store
//!
//! The store is how sealed blocks leave the ingester and how the querier
//! reads history the ingesters have already dropped. It treats a block as an
//! opaque data object plus its index and meta side-files; the compactor and
//! the blocklist poller that maintain the remote block set are external and
//! only `enable_polling` acknowledges them here.

use crate::error::{BackendError, Result};
use crate::index::TraceIndex;
use crate::layout::{block_keypath, tenant_keypath, DATA_OBJECT, INDEX_OBJECT, META_OBJECT};
use crate::meta::BlockMeta;
use crate::raw::{RawReader, RawWriter};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracehouse_core::{Encoding, TraceId};
use tracing::{info, warn};
use uuid::Uuid;

/// A sealed block ready for upload: meta plus the encoded data and index
/// objects. Handles are cheap to clone; the payloads are shared.
#[derive(Debug, Clone)]
pub struct FlushableBlock {
    pub meta: BlockMeta,
    pub data: Bytes,
    pub index: Bytes,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Upload a block as `tenant/<tenant>/<uuid>/{data, index, meta}`.
    async fn write_block(&self, block: &FlushableBlock) -> Result<()>;

    /// Collect partial trace payloads for `trace_id` from blocks whose UUID
    /// falls in `[block_start, block_end]` (empty bounds are unbounded).
    /// Returns the payloads with their encodings; missing blocks and traces
    /// simply contribute nothing.
    async fn find(
        &self,
        tenant_id: &str,
        trace_id: TraceId,
        block_start: &str,
        block_end: &str,
    ) -> Result<(Vec<Bytes>, Vec<Encoding>)>;

    /// Called once by a reader that depends on the external blocklist
    /// poller; blocks until the first poll cycle would complete.
    fn enable_polling(&self);
}

/// Store over an [`ObjectBackend`](crate::backend::ObjectBackend) (or any
/// raw reader/writer pair).
pub struct ObjectBlockStore<B> {
    backend: Arc<B>,
    polling: AtomicBool,
}

impl<B> ObjectBlockStore<B>
where
    B: RawReader + RawWriter,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            polling: AtomicBool::new(false),
        }
    }

    fn parse_block_bound(bound: &str) -> Result<Option<Uuid>> {
        if bound.is_empty() {
            return Ok(None);
        }
        Ok(Some(bound.parse::<Uuid>()?))
    }
}

#[async_trait]
impl<B> Store for ObjectBlockStore<B>
where
    B: RawReader + RawWriter + Send + Sync,
{
    async fn write_block(&self, block: &FlushableBlock) -> Result<()> {
        let keypath = block_keypath(&block.meta.tenant_id, &block.meta.block_id);

        self.backend
            .write(DATA_OBJECT, &keypath, block.data.clone())
            .await?;
        self.backend
            .write(INDEX_OBJECT, &keypath, block.index.clone())
            .await?;
        // Meta goes last: a block without meta is invisible to readers, so a
        // partial upload is never served.
        self.backend
            .write(META_OBJECT, &keypath, block.meta.to_json()?)
            .await?;

        info!(
            tenant = %block.meta.tenant_id,
            block = %block.meta.block_id,
            traces = block.meta.total_traces,
            size = block.meta.size_bytes,
            "block written to object storage"
        );
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: &str,
        trace_id: TraceId,
        block_start: &str,
        block_end: &str,
    ) -> Result<(Vec<Bytes>, Vec<Encoding>)> {
        let start = Self::parse_block_bound(block_start)?;
        let end = Self::parse_block_bound(block_end)?;

        let mut payloads = Vec::new();
        let mut encodings = Vec::new();

        for name in self.backend.list(&tenant_keypath(tenant_id)).await? {
            let block_id: Uuid = match name.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(tenant = tenant_id, name = %name, "skipping non-block entry");
                    continue;
                }
            };
            if start.is_some_and(|s| block_id < s) || end.is_some_and(|e| block_id > e) {
                continue;
            }

            let keypath = block_keypath(tenant_id, &block_id);

            let meta = match self.backend.read(META_OBJECT, &keypath).await {
                Ok(bytes) => BlockMeta::from_json(&bytes)?,
                // Block is mid-upload or mid-compaction; nothing to serve.
                Err(BackendError::DoesNotExist) => continue,
                Err(e) => return Err(e),
            };

            let index_bytes = self.backend.read(INDEX_OBJECT, &keypath).await?;
            let Some(entry) = TraceIndex::decode(&index_bytes)?.find(trace_id) else {
                continue;
            };

            let mut payload = vec![0u8; entry.len as usize];
            self.backend
                .read_range(DATA_OBJECT, &keypath, entry.offset, &mut payload)
                .await?;

            payloads.push(Bytes::from(payload));
            encodings.push(meta.encoding);
        }

        Ok((payloads, encodings))
    }

    fn enable_polling(&self) {
        if !self.polling.swap(true, Ordering::SeqCst) {
            info!("blocklist polling enabled");
        }
    }
}
