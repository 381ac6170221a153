//! Block State Machine
//!
//! A block moves through four states, strictly in order:
//!
//! ```text
//!                     cut (size/age)            complete                  clear
//!  head ───────────────────────────► completing ────────► complete ─────────────► (gone)
//!          (mutable, WAL-backed)     (immutable, local)   (immutable, local + remote)
//! ```
//!
//! The head block appends records to its WAL as traces are cut from the live
//! buffer. Sealing renames the WAL under the completing directory and
//! freezes the records. Completion re-streams the records in sorted
//! trace-ID order, combines duplicate IDs, normalizes search entries, and
//! builds the tag index; the completing block stays behind so searches in
//! flight keep working while that happens.
//!
//! Completing and complete blocks are handed to readers as `Arc` snapshots.
//! Clearing marks the block for deletion and drops the instance's handle;
//! the on-disk files are unlinked only when the last reader releases.

use crate::error::Result;
use crate::search::TagIndex;
use crate::wal::{WalFile, WalRecord};
use bytes::Bytes;
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracehouse_backend::{BlockMeta, FlushableBlock, TraceIndex, TraceIndexEntry};
use tracehouse_core::{combine_trace_bytes, Encoding, SearchEntry, TraceId};
use tracing::{debug, warn};
use uuid::Uuid;

/// The currently-appendable block, backed by a WAL file on local disk.
pub struct HeadBlock {
    id: Uuid,
    wal: WalFile,
    records: Vec<WalRecord>,
    by_id: HashMap<TraceId, Vec<usize>>,
    created_at: Instant,
    data_bytes: usize,
}

impl HeadBlock {
    pub async fn new(wal_dir: &Path, tenant_id: &str) -> Result<Self> {
        let id = Uuid::new_v4();
        let wal = WalFile::create(wal_dir, &id, tenant_id).await?;
        debug!(block = %id, tenant = tenant_id, "head block created");
        Ok(Self {
            id,
            wal,
            records: Vec::new(),
            by_id: HashMap::new(),
            created_at: Instant::now(),
            data_bytes: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Append one record: WAL first, memory second. A WAL failure leaves the
    /// in-memory state untouched and surfaces to the caller.
    pub async fn append(&mut self, record: WalRecord) -> Result<()> {
        self.wal.append(&record).await?;

        self.data_bytes +=
            record.payload.len() + record.search.as_ref().map(|s| s.len()).unwrap_or(0);
        self.by_id
            .entry(record.trace_id)
            .or_default()
            .push(self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn payloads_for(&self, trace_id: TraceId) -> Vec<Bytes> {
        self.by_id
            .get(&trace_id)
            .map(|indexes| indexes.iter().map(|&i| self.records[i].payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the in-memory search page, taken under the instance lock.
    pub fn search_entry_bytes(&self) -> Vec<Bytes> {
        self.records
            .iter()
            .filter_map(|r| r.search.clone())
            .collect()
    }

    /// Seal: sync and move the WAL under `completing_dir`, freezing the
    /// records into a completing block.
    pub async fn seal(self, completing_dir: &Path) -> Result<CompletingBlock> {
        let wal_path = self.wal.seal(completing_dir).await?;
        Ok(CompletingBlock::new(self.id, self.records, self.by_id, wal_path))
    }
}

/// A sealed head block awaiting completion. Immutable; its sealed WAL file
/// is the recovery source until the block is cleared.
pub struct CompletingBlock {
    id: Uuid,
    records: Vec<WalRecord>,
    by_id: HashMap<TraceId, Vec<usize>>,
    wal_path: PathBuf,
    min_time_unix_nano: u64,
    max_time_unix_nano: u64,
    delete_on_drop: AtomicBool,
}

impl CompletingBlock {
    fn new(
        id: Uuid,
        records: Vec<WalRecord>,
        by_id: HashMap<TraceId, Vec<usize>>,
        wal_path: PathBuf,
    ) -> Self {
        let (min, max) = time_bounds(&records);
        Self {
            id,
            records,
            by_id,
            wal_path,
            min_time_unix_nano: min,
            max_time_unix_nano: max,
            delete_on_drop: AtomicBool::new(false),
        }
    }

    /// Rebuild from replayed WAL records after a restart. Search entries are
    /// not recovered (the index is rebuilt only on completion), so replay
    /// strips them before calling this.
    pub fn recovered(id: Uuid, records: Vec<WalRecord>, wal_path: PathBuf) -> Self {
        let mut by_id: HashMap<TraceId, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            by_id.entry(record.trace_id).or_default().push(i);
        }
        Self::new(id, records, by_id, wal_path)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn records(&self) -> &[WalRecord] {
        &self.records
    }

    pub fn payloads_for(&self, trace_id: TraceId) -> Vec<Bytes> {
        self.by_id
            .get(&trace_id)
            .map(|indexes| indexes.iter().map(|&i| self.records[i].payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn search_entries(&self) -> impl Iterator<Item = &Bytes> {
        self.records.iter().filter_map(|r| r.search.as_ref())
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        overlaps(self.min_time_unix_nano, self.max_time_unix_nano, start, end)
    }

    /// Unlink the sealed WAL once the last reader drops its handle.
    pub fn mark_deleted(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for CompletingBlock {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::Acquire) {
            if let Err(err) = std::fs::remove_file(&self.wal_path) {
                warn!(path = ?self.wal_path, error = %err, "failed to remove sealed wal");
            }
        }
    }
}

/// One search entry of a complete block, kept decoded beside the byte count
/// of its normalized encoding (what a reader actually pages through).
pub struct IndexedEntry {
    pub entry: SearchEntry,
    pub norm_len: u32,
}

/// A locally finalized block: records combined and sorted by trace ID, tag
/// index built, meta recorded. Pending upload and flush-age clearing.
pub struct CompleteBlock {
    meta: BlockMeta,
    data: Bytes,
    trace_index: TraceIndex,
    index_bytes: Bytes,
    entries: Vec<IndexedEntry>,
    tag_index: TagIndex,
    local_dir: PathBuf,
    flushed_at: Mutex<Option<Instant>>,
    delete_on_drop: AtomicBool,
}

impl CompleteBlock {
    /// Build a complete block by re-streaming a completing block's records:
    /// duplicate trace IDs are combined, search entries merged and
    /// normalized, and everything laid out in sorted trace-ID order. The
    /// completing block is left untouched for concurrent readers (and for a
    /// retry if this build fails).
    pub async fn build(
        tenant_id: &str,
        encoding: Encoding,
        completing: &CompletingBlock,
        complete_dir: &Path,
    ) -> Result<Self> {
        let mut grouped: BTreeMap<TraceId, (Vec<&Bytes>, Vec<SearchEntry>)> = BTreeMap::new();
        for record in completing.records() {
            let slot = grouped.entry(record.trace_id).or_default();
            slot.0.push(&record.payload);
            if let Some(search) = &record.search {
                match SearchEntry::decode_bytes(search) {
                    Ok(entry) => slot.1.push(entry),
                    Err(err) => {
                        warn!(block = %completing.id(), error = %err, "dropping undecodable search entry")
                    }
                }
            }
        }

        let mut data = Vec::new();
        let mut index_entries = Vec::with_capacity(grouped.len());
        let mut entries = Vec::new();
        let mut tag_index = TagIndex::default();
        let mut min_time = 0u64;
        let mut max_time = 0u64;

        for (trace_id, (payloads, searches)) in grouped {
            let mut combined: Option<Bytes> = None;
            for payload in payloads {
                let (bytes, _) =
                    combine_trace_bytes(combined.as_deref(), payload, encoding, encoding)?;
                combined = Some(bytes);
            }
            let payload = combined.unwrap_or_default();

            index_entries.push(TraceIndexEntry {
                trace_id,
                offset: data.len() as u64,
                len: payload.len() as u32,
            });
            data.extend_from_slice(&payload);

            if let Some(merged) = SearchEntry::merge(&searches) {
                let entry_idx = entries.len() as u32;
                for pair in &merged.tags {
                    tag_index.insert(&pair.key, &pair.value, entry_idx);
                }
                if merged.start_time_unix_nano != 0
                    && (min_time == 0 || merged.start_time_unix_nano < min_time)
                {
                    min_time = merged.start_time_unix_nano;
                }
                if merged.end_time_unix_nano > max_time {
                    max_time = merged.end_time_unix_nano;
                }
                let norm_len = merged.normalized().encoded_len() as u32;
                entries.push(IndexedEntry {
                    entry: merged,
                    norm_len,
                });
            }
        }

        let trace_index = TraceIndex::from_sorted(index_entries);
        let index_bytes = trace_index.encode();
        let data = Bytes::from(data);
        let meta = BlockMeta {
            block_id: completing.id(),
            tenant_id: tenant_id.to_string(),
            encoding,
            min_time_unix_nano: min_time,
            max_time_unix_nano: max_time,
            total_traces: trace_index.len() as u32,
            size_bytes: data.len() as u64,
        };

        let local_dir = complete_dir.join(meta.block_id.to_string());
        tokio::fs::create_dir_all(&local_dir).await?;
        tokio::fs::write(local_dir.join("data"), &data).await?;
        tokio::fs::write(local_dir.join("index"), &index_bytes).await?;
        tokio::fs::write(local_dir.join("meta"), meta.to_json()?).await?;

        Ok(Self {
            meta,
            data,
            trace_index,
            index_bytes,
            entries,
            tag_index,
            local_dir,
            flushed_at: Mutex::new(None),
            delete_on_drop: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.meta.block_id
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    pub fn payload_for(&self, trace_id: TraceId) -> Option<Bytes> {
        self.trace_index.find(trace_id).map(|e| {
            self.data
                .slice(e.offset as usize..e.offset as usize + e.len as usize)
        })
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.meta.overlaps(start, end)
    }

    /// Upload handle for `Store::write_block`; payloads are shared, not
    /// copied.
    pub fn flushable(&self) -> FlushableBlock {
        FlushableBlock {
            meta: self.meta.clone(),
            data: self.data.clone(),
            index: self.index_bytes.clone(),
        }
    }

    pub fn mark_flushed(&self) {
        let mut flushed = self.flushed_at.lock().unwrap_or_else(|e| e.into_inner());
        if flushed.is_none() {
            *flushed = Some(Instant::now());
        }
    }

    /// Time since the block was uploaded; `None` until it has been.
    pub fn flushed_age(&self) -> Option<Duration> {
        self.flushed_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| at.elapsed())
    }

    /// Unlink the local block directory once the last reader drops.
    pub fn mark_deleted(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for CompleteBlock {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::Acquire) {
            if let Err(err) = std::fs::remove_dir_all(&self.local_dir) {
                warn!(path = ?self.local_dir, error = %err, "failed to remove complete block dir");
            }
        }
    }
}

fn time_bounds(records: &[WalRecord]) -> (u64, u64) {
    let mut min = 0u64;
    let mut max = 0u64;
    for record in records {
        let Some(search) = &record.search else { continue };
        let Ok(entry) = SearchEntry::decode_bytes(search) else { continue };
        if entry.start_time_unix_nano != 0 && (min == 0 || entry.start_time_unix_nano < min) {
            min = entry.start_time_unix_nano;
        }
        if entry.end_time_unix_nano > max {
            max = entry.end_time_unix_nano;
        }
    }
    (min, max)
}

fn overlaps(min: u64, max: u64, start: u64, end: u64) -> bool {
    if min == 0 && max == 0 {
        // No timing info; never skip.
        return true;
    }
    let after_start = end == 0 || min <= end;
    let before_end = start == 0 || max >= start;
    after_start && before_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracehouse_core::{Span, Trace};

    fn id(byte: u8) -> TraceId {
        TraceId::from_slice(&[byte; 16]).unwrap()
    }

    fn payload(span_ids: &[u8]) -> Bytes {
        let trace = Trace {
            spans: span_ids
                .iter()
                .map(|&s| Span {
                    span_id: vec![s; 8],
                    name: "op".to_string(),
                    service_name: "svc".to_string(),
                    start_time_unix_nano: 1,
                    end_time_unix_nano: 2,
                    tags: Default::default(),
                })
                .collect(),
        };
        Encoding::Proto.encode(&trace)
    }

    fn search_bytes(trace_id: TraceId, key: &str, value: &str) -> Bytes {
        let mut entry = SearchEntry::new(trace_id);
        entry.start_time_unix_nano = 100;
        entry.end_time_unix_nano = 200;
        entry.add_tag(key, value);
        entry.encode_bytes()
    }

    async fn dirs() -> (TempDir, PathBuf, PathBuf) {
        let root = TempDir::new().unwrap();
        let completing = root.path().join("completing");
        let complete = root.path().join("complete");
        tokio::fs::create_dir_all(&completing).await.unwrap();
        tokio::fs::create_dir_all(&complete).await.unwrap();
        (root, completing, complete)
    }

    #[tokio::test]
    async fn test_head_block_appends_and_finds() {
        let (root, _completing, _complete) = dirs().await;
        let mut head = HeadBlock::new(root.path(), "acme").await.unwrap();
        assert!(head.is_empty());

        head.append(WalRecord {
            trace_id: id(1),
            payload: payload(&[1]),
            search: Some(search_bytes(id(1), "foo", "bar")),
        })
        .await
        .unwrap();
        head.append(WalRecord {
            trace_id: id(1),
            payload: payload(&[2]),
            search: None,
        })
        .await
        .unwrap();

        assert!(!head.is_empty());
        assert_eq!(head.payloads_for(id(1)).len(), 2);
        assert!(head.payloads_for(id(9)).is_empty());
        assert_eq!(head.search_entry_bytes().len(), 1);
    }

    #[tokio::test]
    async fn test_seal_then_complete_combines_duplicates() {
        let (root, completing_dir, complete_dir) = dirs().await;
        let mut head = HeadBlock::new(root.path(), "acme").await.unwrap();

        // Same trace twice with an overlapping span set, plus a second trace.
        head.append(WalRecord {
            trace_id: id(1),
            payload: payload(&[1, 2]),
            search: Some(search_bytes(id(1), "foo", "bar")),
        })
        .await
        .unwrap();
        head.append(WalRecord {
            trace_id: id(1),
            payload: payload(&[2, 3]),
            search: Some(search_bytes(id(1), "foo", "bar")),
        })
        .await
        .unwrap();
        head.append(WalRecord {
            trace_id: id(2),
            payload: payload(&[9]),
            search: None,
        })
        .await
        .unwrap();

        let block_id = head.id();
        let completing = head.seal(&completing_dir).await.unwrap();
        assert_eq!(completing.id(), block_id);
        assert_eq!(completing.records().len(), 3);

        let complete = CompleteBlock::build("acme", Encoding::Proto, &completing, &complete_dir)
            .await
            .unwrap();
        assert_eq!(complete.meta().total_traces, 2);

        // Duplicate spans collapsed across the two fragments of trace 1.
        let combined = Encoding::Proto
            .decode(&complete.payload_for(id(1)).unwrap())
            .unwrap();
        assert_eq!(combined.spans.len(), 3);

        // One merged search entry for trace 1; trace 2 had none.
        assert_eq!(complete.entries().len(), 1);
        assert!(complete.payload_for(id(2)).is_some());
    }

    #[tokio::test]
    async fn test_cleared_blocks_unlink_files_after_last_reader() {
        let (root, completing_dir, complete_dir) = dirs().await;
        let mut head = HeadBlock::new(root.path(), "acme").await.unwrap();
        head.append(WalRecord {
            trace_id: id(1),
            payload: payload(&[1]),
            search: None,
        })
        .await
        .unwrap();

        let completing = std::sync::Arc::new(head.seal(&completing_dir).await.unwrap());
        let wal_path = completing_dir.join(crate::wal::wal_file_name(&completing.id(), "acme"));
        assert!(wal_path.exists());

        let complete = std::sync::Arc::new(
            CompleteBlock::build("acme", Encoding::Proto, &completing, &complete_dir)
                .await
                .unwrap(),
        );
        let block_dir = complete_dir.join(complete.id().to_string());
        assert!(block_dir.exists());

        // A reader still holds the completing block: marking deleted does
        // not unlink yet.
        let reader = completing.clone();
        completing.mark_deleted();
        drop(completing);
        assert!(wal_path.exists());
        drop(reader);
        assert!(!wal_path.exists());

        complete.mark_deleted();
        drop(complete);
        assert!(!block_dir.exists());
    }

    #[tokio::test]
    async fn test_recovered_block_serves_payloads() {
        let (root, completing_dir, _complete) = dirs().await;
        let mut head = HeadBlock::new(root.path(), "acme").await.unwrap();
        head.append(WalRecord {
            trace_id: id(5),
            payload: payload(&[5]),
            search: Some(search_bytes(id(5), "foo", "bar")),
        })
        .await
        .unwrap();
        let block_id = head.id();
        let sealed = head.seal(&completing_dir).await.unwrap();
        drop(sealed);

        let wal_path = completing_dir.join(crate::wal::wal_file_name(&block_id, "acme"));
        let mut records = WalFile::replay(&wal_path).await.unwrap();
        for record in &mut records {
            record.search = None;
        }

        let recovered = CompletingBlock::recovered(block_id, records, wal_path);
        assert_eq!(recovered.payloads_for(id(5)).len(), 1);
        assert_eq!(recovered.search_entries().count(), 0);
    }
}
