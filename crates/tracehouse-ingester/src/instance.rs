//! Per-Tenant Instance
//!
//! The instance is the integration point of the write path: it owns one
//! tenant's live buffer, head block, completing blocks, and complete blocks,
//! and runs the cut/complete/clear state machine over them.
//!
//! ## Locking discipline
//!
//! All mutable state sits behind one `RwLock`. Mutations (`push_bytes`, the
//! cuts, `complete_block`, the clears) hold the write guard. Read paths
//! (`find_trace_by_id`, `search`, tag enumeration) hold the read guard only
//! long enough to clone `Arc` handles and copy the unsealed search page,
//! then work lock-free on those snapshots. Clearing a block removes the
//! instance's handle and flags the files for deletion; the last reader's
//! drop performs the unlink, so an in-flight search never observes a block
//! disappearing under it.

use crate::block::{CompleteBlock, CompletingBlock, HeadBlock};
use crate::error::{Error, Result};
use crate::limiter::Limiter;
use crate::search::Searcher;
use crate::traces::LiveTrace;
use crate::wal::WalRecord;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracehouse_backend::FlushableBlock;
use tracehouse_core::{
    combine_trace_bytes, combine_trace_protos, Encoding, SearchEntry, SearchRequest,
    SearchResponse, Trace, TraceId,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Local disk layout shared by all instances of one ingester.
#[derive(Debug, Clone)]
pub struct LocalDirs {
    pub wal: PathBuf,
    pub completing: PathBuf,
    pub complete: PathBuf,
}

impl LocalDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            wal: root.join("wal"),
            completing: root.join("completing"),
            complete: root.join("complete"),
        }
    }

    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.wal).await?;
        tokio::fs::create_dir_all(&self.completing).await?;
        tokio::fs::create_dir_all(&self.complete).await?;
        Ok(())
    }
}

struct InstanceState {
    traces: HashMap<TraceId, LiveTrace>,
    head: HeadBlock,
    completing: Vec<Arc<CompletingBlock>>,
    complete: Vec<Arc<CompleteBlock>>,
}

pub struct Instance {
    tenant_id: String,
    encoding: Encoding,
    state: RwLock<InstanceState>,

    /// Live-buffer population; equals `traces.len()` whenever the write
    /// guard is not held.
    trace_count: AtomicUsize,
    bytes_received: AtomicU64,

    limiter: Arc<Limiter>,
    dirs: LocalDirs,
}

impl Instance {
    pub async fn new(tenant_id: &str, limiter: Arc<Limiter>, dirs: LocalDirs) -> Result<Self> {
        Self::with_completing(tenant_id, limiter, dirs, Vec::new()).await
    }

    /// Start an instance with completing blocks recovered from WAL replay.
    pub async fn with_completing(
        tenant_id: &str,
        limiter: Arc<Limiter>,
        dirs: LocalDirs,
        completing: Vec<CompletingBlock>,
    ) -> Result<Self> {
        let head = HeadBlock::new(&dirs.wal, tenant_id).await?;
        info!(
            tenant = tenant_id,
            recovered_blocks = completing.len(),
            "instance created"
        );

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            encoding: Encoding::Proto,
            state: RwLock::new(InstanceState {
                traces: HashMap::new(),
                head,
                completing: completing.into_iter().map(Arc::new).collect(),
                complete: Vec::new(),
            }),
            trace_count: AtomicUsize::new(0),
            bytes_received: AtomicU64::new(0),
            limiter,
            dirs,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Live-buffer population, readable without the instance lock.
    pub fn trace_count(&self) -> usize {
        self.trace_count.load(Ordering::Acquire)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub async fn live_traces_len(&self) -> usize {
        self.state.read().await.traces.len()
    }

    /// Append a trace fragment (and optional search entry bytes) to the live
    /// buffer. Rejections never mutate state.
    pub async fn push_bytes(
        &self,
        trace_id: &[u8],
        payload: Bytes,
        search: Option<Bytes>,
    ) -> Result<()> {
        let id = TraceId::from_slice(trace_id)?;
        let size = payload.len() + search.as_ref().map(|s| s.len()).unwrap_or(0);

        if !self.limiter.allow_bytes(size) {
            return Err(Error::RateLimited {
                tenant: self.tenant_id.clone(),
            });
        }

        let mut state = self.state.write().await;

        let is_new = !state.traces.contains_key(&id);
        if is_new && state.traces.len() >= self.limiter.max_traces_per_instance() {
            return Err(Error::MaxLiveTracesExceeded {
                max: self.limiter.max_traces_per_instance(),
            });
        }

        let encoding = self.encoding;
        let live = state
            .traces
            .entry(id)
            .or_insert_with(|| LiveTrace::new(id, encoding));

        let new_size = live.size_with(&payload, search.as_ref());
        if new_size > self.limiter.max_bytes_per_trace() {
            // Roll back the insert if this push created the trace.
            if is_new {
                state.traces.remove(&id);
            }
            self.trace_count.store(state.traces.len(), Ordering::Release);
            return Err(Error::TraceTooLarge {
                trace_id: id.to_hex(),
                size: new_size,
                max: self.limiter.max_bytes_per_trace(),
            });
        }

        live.push(payload, search);
        self.trace_count.store(state.traces.len(), Ordering::Release);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Move eligible live traces into the head block: all of them when
    /// `immediate`, otherwise those idle for at least `max_idle`.
    pub async fn cut_complete_traces(&self, max_idle: Duration, immediate: bool) -> Result<()> {
        let mut state = self.state.write().await;

        let ready: Vec<TraceId> = state
            .traces
            .iter()
            .filter(|(_, t)| immediate || t.last_received.elapsed() >= max_idle)
            .map(|(id, _)| *id)
            .collect();

        for id in ready {
            // Invariant: id was collected from the map above.
            let Some(live) = state.traces.remove(&id) else { continue };
            let record = self.record_from_live(live)?;
            state.head.append(record).await?;
        }

        self.trace_count.store(state.traces.len(), Ordering::Release);
        Ok(())
    }

    fn record_from_live(&self, live: LiveTrace) -> Result<WalRecord> {
        // The single-fragment fast path keeps the original bytes, which also
        // keeps inspected-byte accounting exact across the cut.
        let payload = if live.payloads.len() == 1 {
            live.payloads.into_iter().next().unwrap_or_default()
        } else {
            let mut combined: Option<Bytes> = None;
            for fragment in &live.payloads {
                let (bytes, _) = combine_trace_bytes(
                    combined.as_deref(),
                    fragment,
                    live.encoding,
                    live.encoding,
                )?;
                combined = Some(bytes);
            }
            combined.unwrap_or_default()
        };

        let search = match live.search_entries.len() {
            0 => None,
            1 => live.search_entries.into_iter().next(),
            _ => {
                let decoded: Vec<SearchEntry> = live
                    .search_entries
                    .iter()
                    .filter_map(|bytes| SearchEntry::decode_bytes(bytes).ok())
                    .collect();
                SearchEntry::merge(&decoded).map(|merged| merged.encode_bytes())
            }
        };

        Ok(WalRecord {
            trace_id: live.id,
            payload,
            search,
        })
    }

    /// Seal the head block into a completing block if it crossed either
    /// threshold (or unconditionally with `immediate`). An empty head block
    /// never cuts. Returns the sealed block's ID.
    pub async fn cut_block_if_ready(
        &self,
        max_block_age: Duration,
        max_block_bytes: usize,
        immediate: bool,
    ) -> Result<Option<Uuid>> {
        let mut state = self.state.write().await;

        if state.head.is_empty() {
            return Ok(None);
        }
        let ready = immediate
            || state.head.data_bytes() >= max_block_bytes
            || state.head.age() >= max_block_age;
        if !ready {
            return Ok(None);
        }

        let fresh = HeadBlock::new(&self.dirs.wal, &self.tenant_id).await?;
        let sealed = std::mem::replace(&mut state.head, fresh);
        let block_id = sealed.id();
        let completing = sealed.seal(&self.dirs.completing).await?;
        state.completing.push(Arc::new(completing));

        info!(tenant = %self.tenant_id, block = %block_id, "head block cut");
        Ok(Some(block_id))
    }

    /// Build the complete block for a completing block. The completing block
    /// stays behind (searches in flight keep using it) until
    /// `clear_completing_block`; a failed build leaves it for retry.
    pub async fn complete_block(&self, block_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;

        let completing = state
            .completing
            .iter()
            .find(|b| b.id() == block_id)
            .cloned()
            .ok_or(Error::BlockNotFound(block_id))?;

        let complete = CompleteBlock::build(
            &self.tenant_id,
            self.encoding,
            &completing,
            &self.dirs.complete,
        )
        .await?;

        info!(
            tenant = %self.tenant_id,
            block = %block_id,
            traces = complete.meta().total_traces,
            size = complete.meta().size_bytes,
            "block completed"
        );
        state.complete.push(Arc::new(complete));
        Ok(())
    }

    /// Drop the completing block and its sealed WAL. The unlink happens when
    /// the last in-flight reader releases its handle.
    pub async fn clear_completing_block(&self, block_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;

        let position = state
            .completing
            .iter()
            .position(|b| b.id() == block_id)
            .ok_or(Error::BlockNotFound(block_id))?;
        let block = state.completing.swap_remove(position);
        block.mark_deleted();

        debug!(tenant = %self.tenant_id, block = %block_id, "completing block cleared");
        Ok(())
    }

    /// Upload handle for a complete block, or `None` if it is gone.
    pub async fn get_block_to_be_flushed(&self, block_id: Uuid) -> Option<FlushableBlock> {
        self.state
            .read()
            .await
            .complete
            .iter()
            .find(|b| b.id() == block_id)
            .map(|b| b.flushable())
    }

    pub async fn mark_block_flushed(&self, block_id: Uuid) {
        if let Some(block) = self
            .state
            .read()
            .await
            .complete
            .iter()
            .find(|b| b.id() == block_id)
        {
            block.mark_flushed();
        }
    }

    pub async fn completing_block_ids(&self) -> Vec<Uuid> {
        self.state
            .read()
            .await
            .completing
            .iter()
            .map(|b| b.id())
            .collect()
    }

    pub async fn unflushed_block_ids(&self) -> Vec<Uuid> {
        self.state
            .read()
            .await
            .complete
            .iter()
            .filter(|b| b.flushed_age().is_none())
            .map(|b| b.id())
            .collect()
    }

    /// Remove complete blocks whose upload is older than `min_age`; their
    /// local files unlink once the last reader drops.
    pub async fn clear_flushed_blocks(&self, min_age: Duration) -> Result<()> {
        let mut state = self.state.write().await;

        state.complete.retain(|block| {
            let expired = block.flushed_age().is_some_and(|age| age >= min_age);
            if expired {
                block.mark_deleted();
                debug!(tenant = %self.tenant_id, block = %block.id(), "flushed block cleared");
            }
            !expired
        });
        Ok(())
    }

    /// Exhaustive union: the trace's fragments from the live buffer, the
    /// head block, and every completing/complete block, merged with
    /// duplicate-span elimination.
    pub async fn find_trace_by_id(&self, trace_id: &[u8]) -> Result<Option<Trace>> {
        let id = TraceId::from_slice(trace_id)?;

        let (live_payloads, head_payloads, completing, complete) = {
            let state = self.state.read().await;
            let live = state
                .traces
                .get(&id)
                .map(|t| t.payloads.clone())
                .unwrap_or_default();
            (
                live,
                state.head.payloads_for(id),
                state.completing.clone(),
                state.complete.clone(),
            )
        };

        let mut combined: Option<Trace> = None;
        let mut merge = |payload: &Bytes| -> Result<()> {
            let fragment = self.encoding.decode(payload)?;
            let (next, _) = combine_trace_protos(combined.take(), &fragment);
            combined = Some(next);
            Ok(())
        };

        for payload in live_payloads.iter().chain(head_payloads.iter()) {
            merge(payload)?;
        }
        for block in &completing {
            for payload in block.payloads_for(id) {
                merge(&payload)?;
            }
        }
        for block in &complete {
            if let Some(payload) = block.payload_for(id) {
                merge(&payload)?;
            }
        }

        Ok(combined)
    }

    /// Search every stage, newest first: live buffer, head block's search
    /// page, completing blocks, complete blocks. First occurrence of a trace
    /// ID wins; inspection metrics accumulate per stage.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        let (live_entries, head_entries, completing, complete) = {
            let state = self.state.read().await;
            let live: Vec<Bytes> = state
                .traces
                .values()
                .flat_map(|t| t.search_entries.iter().cloned())
                .collect();
            (
                live,
                state.head.search_entry_bytes(),
                state.completing.clone(),
                state.complete.clone(),
            )
        };

        let mut searcher = Searcher::new(req);
        // The head block is always one inspected block, whether its entries
        // sit in the live buffer or its search page.
        searcher.metrics.inspected_blocks += 1;

        for bytes in live_entries.iter().chain(head_entries.iter()) {
            if searcher.limit_reached() {
                return Ok(searcher.into_response());
            }
            searcher.visit_raw_entry(bytes);
        }

        for block in &completing {
            if searcher.limit_reached() {
                break;
            }
            if !block.overlaps(req.start, req.end) {
                searcher.metrics.skipped_blocks += 1;
                continue;
            }
            searcher.metrics.inspected_blocks += 1;
            for bytes in block.search_entries() {
                if searcher.limit_reached() {
                    break;
                }
                searcher.visit_raw_entry(bytes);
            }
        }

        for block in &complete {
            if searcher.limit_reached() {
                break;
            }
            if !block.overlaps(req.start, req.end) {
                searcher.metrics.skipped_blocks += 1;
                continue;
            }
            searcher.visit_complete_block(block);
        }

        Ok(searcher.into_response())
    }

    /// Union of tag names across all stages, sorted and deduplicated.
    pub async fn get_search_tags(&self) -> Vec<String> {
        let (raw_entries, complete) = self.search_entry_snapshot().await;

        let mut names = BTreeSet::new();
        for bytes in &raw_entries {
            if let Ok(entry) = SearchEntry::decode_bytes(bytes) {
                names.extend(entry.tags.into_iter().map(|pair| pair.key));
            }
        }
        for block in &complete {
            names.extend(block.tag_index().tag_names().cloned());
        }
        names.into_iter().collect()
    }

    /// Union of values for one tag key across all stages, sorted and
    /// deduplicated.
    pub async fn get_search_tag_values(&self, key: &str) -> Vec<String> {
        let (raw_entries, complete) = self.search_entry_snapshot().await;

        let mut values = BTreeSet::new();
        for bytes in &raw_entries {
            if let Ok(entry) = SearchEntry::decode_bytes(bytes) {
                values.extend(
                    entry
                        .tags
                        .into_iter()
                        .filter(|pair| pair.key == key)
                        .map(|pair| pair.value),
                );
            }
        }
        for block in &complete {
            values.extend(block.tag_index().tag_values(key).cloned());
        }
        values.into_iter().collect()
    }

    async fn search_entry_snapshot(&self) -> (Vec<Bytes>, Vec<Arc<CompleteBlock>>) {
        let state = self.state.read().await;
        let mut raw: Vec<Bytes> = state
            .traces
            .values()
            .flat_map(|t| t.search_entries.iter().cloned())
            .collect();
        raw.extend(state.head.search_entry_bytes());
        for block in &state.completing {
            raw.extend(block.search_entries().cloned());
        }
        (raw, state.complete.clone())
    }
}
