//! Write-Ahead Log
//!
//! Each head block owns one WAL file on local disk. Traces cut from the live
//! buffer are appended as length-prefixed records before the block ever
//! leaves memory, so a crash loses at most the traces still in the buffer.
//!
//! ## File layout
//!
//! One file per head block at `<local>/wal/<blockUUID>:<tenantID>`. Sealing
//! a block renames its file under `<local>/completing/`, which is the replay
//! source for blocks that were sealed but never completed.
//!
//! ```text
//! frame  := len u32 LE | crc32 u32 LE | record
//! record := trace_id (16) | payload_len u32 LE | payload
//!         | search_len u32 LE | search
//! file   := frame *
//! ```
//!
//! `len` covers the record only. A trailing partial frame is discarded on
//! replay (the write was cut mid-record); a CRC mismatch skips just that
//! frame. Replay stops with an error only on real I/O failure.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracehouse_core::TraceId;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One logical WAL record: a trace's combined payload plus its optional
/// search entry bytes.
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub trace_id: TraceId,
    pub payload: Bytes,
    pub search: Option<Bytes>,
}

impl WalRecord {
    fn encode(&self) -> Vec<u8> {
        let search_len = self.search.as_ref().map(|s| s.len()).unwrap_or(0);
        let mut buf =
            Vec::with_capacity(16 + 4 + self.payload.len() + 4 + search_len);
        buf.extend_from_slice(self.trace_id.as_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&(search_len as u32).to_le_bytes());
        if let Some(search) = &self.search {
            buf.extend_from_slice(search);
        }
        buf
    }

    fn decode(buf: &[u8]) -> Option<WalRecord> {
        if buf.len() < 16 + 4 {
            return None;
        }
        let trace_id = TraceId::from_slice(&buf[..16]).ok()?;
        let mut cursor = 16;

        let payload_len = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().ok()?) as usize;
        cursor += 4;
        if buf.len() < cursor + payload_len + 4 {
            return None;
        }
        let payload = Bytes::copy_from_slice(&buf[cursor..cursor + payload_len]);
        cursor += payload_len;

        let search_len = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().ok()?) as usize;
        cursor += 4;
        if buf.len() < cursor + search_len {
            return None;
        }
        let search = if search_len > 0 {
            Some(Bytes::copy_from_slice(&buf[cursor..cursor + search_len]))
        } else {
            None
        };

        Some(WalRecord {
            trace_id,
            payload,
            search,
        })
    }
}

/// `<blockUUID>:<tenantID>`, the on-disk name replay uses to route a sealed
/// block back to its instance.
pub fn wal_file_name(block_id: &Uuid, tenant_id: &str) -> String {
    format!("{}:{}", block_id, tenant_id)
}

pub fn parse_wal_file_name(name: &str) -> Option<(Uuid, String)> {
    let (id, tenant) = name.split_once(':')?;
    if tenant.is_empty() {
        return None;
    }
    Some((id.parse().ok()?, tenant.to_string()))
}

/// Append-only WAL file for one head block.
pub struct WalFile {
    path: PathBuf,
    file: File,
    size: u64,
}

impl WalFile {
    /// Create (or reopen for append) the WAL for a block.
    pub async fn create(dir: &Path, block_id: &Uuid, tenant_id: &str) -> Result<Self> {
        let path = dir.join(wal_file_name(block_id, tenant_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        debug!(path = ?path, size, "wal opened");
        Ok(Self { path, file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn append(&mut self, record: &WalRecord) -> Result<()> {
        let body = record.encode();
        let crc = crc32fast::hash(&body);

        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&body);

        self.file.write_all(&frame).await?;
        self.size += frame.len() as u64;
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<()> {
        self.file.sync_all().await?;
        Ok(())
    }

    /// Seal this WAL: sync, close, and move the file under `completing_dir`.
    /// Returns the sealed path.
    pub async fn seal(mut self, completing_dir: &Path) -> Result<PathBuf> {
        self.file.sync_all().await?;
        drop(self.file);

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                Error::Wal(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "wal path has no file name",
                ))
            })?;
        let sealed = completing_dir.join(file_name);
        tokio::fs::rename(&self.path, &sealed).await?;

        info!(from = ?self.path, to = ?sealed, "wal sealed");
        Ok(sealed)
    }

    /// Read every intact record out of a WAL file. Skips CRC-mismatched
    /// frames, stops at a truncated tail, errors only on real I/O failure.
    pub async fn replay(path: &Path) -> Result<Vec<WalRecord>> {
        let buf = tokio::fs::read(path).await?;
        let mut records = Vec::new();
        let mut cursor = 0usize;

        while cursor + 8 <= buf.len() {
            let len = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
            let crc = u32::from_le_bytes(buf[cursor + 4..cursor + 8].try_into().unwrap());
            let body_start = cursor + 8;

            if body_start + len > buf.len() {
                warn!(path = ?path, offset = cursor, "truncated wal tail discarded");
                break;
            }
            let body = &buf[body_start..body_start + len];
            cursor = body_start + len;

            if crc32fast::hash(body) != crc {
                warn!(path = ?path, offset = body_start, "corrupt wal record skipped");
                continue;
            }
            match WalRecord::decode(body) {
                Some(record) => records.push(record),
                None => {
                    warn!(path = ?path, offset = body_start, "undecodable wal record skipped");
                }
            }
        }

        info!(path = ?path, recovered = records.len(), "wal replay complete");
        Ok(records)
    }
}
