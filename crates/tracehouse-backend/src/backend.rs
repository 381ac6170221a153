//! Object Backend
//!
//! [`ObjectBackend`] implements [`RawReader`] / [`RawWriter`] over any
//! `object_store::ObjectStore`. It holds two logical handles onto the same
//! store: a *primary* handle for writes and listings and a *hedged* handle
//! for reads (see [`crate::hedged`]).
//!
//! ## Write path
//!
//! Small objects go up as one atomic put. Objects larger than
//! `buffer_size * max_buffers` stream through a multipart upload in
//! `buffer_size` chunks, which bounds memory on large block flushes.
//!
//! ## Staged append
//!
//! Block IDs are generated from the 1-based block index: the index is
//! written little-endian into a 64-byte buffer and base-64 encoded, so every
//! ID within one object has the same length. Each call stages the new block
//! and commits the full committed+new list atomically, leaving the object
//! readable as the in-order concatenation after every call.

use crate::config::BackendConfig;
use crate::error::Result;
use crate::hedged::HedgedReader;
use crate::layout::object_file_name;
use crate::raw::{AppendTracker, RawReader, RawWriter};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{Bytes, BytesMut};
use object_store::{path::Path, ObjectStore};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct ObjectBackend {
    primary: Arc<dyn ObjectStore>,
    hedged: HedgedReader,
    cfg: BackendConfig,
}

impl ObjectBackend {
    pub fn new(store: Arc<dyn ObjectStore>, cfg: BackendConfig) -> Self {
        let hedged = HedgedReader::new(store.clone(), cfg.hedge_delay);
        Self {
            primary: store,
            hedged,
            cfg,
        }
    }

    fn path(keypath: &[String], name: &str) -> Path {
        Path::from(object_file_name(keypath, name))
    }

    /// Base-64 block ID for the 1-based block index. All IDs within one
    /// object must be the same length, hence the fixed 64-byte buffer.
    fn block_id(index: u32) -> String {
        let mut buf = [0u8; 64];
        buf[..4].copy_from_slice(&index.to_le_bytes());
        BASE64.encode(buf)
    }
}

#[async_trait]
impl RawReader for ObjectBackend {
    async fn list(&self, keypath: &[String]) -> Result<Vec<String>> {
        let prefix = Path::from(keypath.join("/"));
        let listing = self.primary.list_with_delimiter(Some(&prefix)).await?;

        let mut children = Vec::with_capacity(listing.common_prefixes.len());
        for child in listing.common_prefixes {
            if let Some(name) = child.filename() {
                children.push(name.to_string());
            }
        }
        Ok(children)
    }

    async fn read(&self, name: &str, keypath: &[String]) -> Result<Bytes> {
        let location = Self::path(keypath, name);
        Ok(self.hedged.get_bytes(&location).await?)
    }

    async fn read_range(
        &self,
        name: &str,
        keypath: &[String],
        offset: u64,
        dest: &mut [u8],
    ) -> Result<()> {
        let location = Self::path(keypath, name);
        let meta = self.primary.head(&location).await?;

        let offset = offset as usize;
        let available = meta.size.saturating_sub(offset);
        let size = dest.len().min(available);
        if size == 0 {
            return Ok(());
        }

        let bytes = self.hedged.get_range(&location, offset..offset + size).await?;
        dest[..size].copy_from_slice(&bytes);
        Ok(())
    }
}

#[async_trait]
impl RawWriter for ObjectBackend {
    async fn write(&self, name: &str, keypath: &[String], data: Bytes) -> Result<()> {
        let location = Self::path(keypath, name);

        if data.len() <= self.cfg.buffer_size * self.cfg.max_buffers {
            self.primary.put(&location, data).await?;
            return Ok(());
        }

        let (_id, mut writer) = self.primary.put_multipart(&location).await?;
        for chunk in data.chunks(self.cfg.buffer_size) {
            writer.write_all(chunk).await?;
        }
        writer.shutdown().await?;

        debug!(location = %location, size = data.len(), "multipart upload complete");
        Ok(())
    }

    async fn append(
        &self,
        name: &str,
        keypath: &[String],
        tracker: Option<AppendTracker>,
        buffer: Bytes,
    ) -> Result<AppendTracker> {
        let mut tracker = tracker.unwrap_or_else(|| AppendTracker {
            name: object_file_name(keypath, name),
            committed: Vec::new(),
        });
        let location = Path::from(tracker.name.clone());

        let id = Self::block_id(tracker.committed.len() as u32 + 1);

        // Stage the new block against the bytes committed so far, then
        // commit the full list in one atomic put.
        let committed = if tracker.committed.is_empty() {
            buffer
        } else {
            let existing = self.hedged.get_bytes(&location).await?;
            let mut joined = BytesMut::with_capacity(existing.len() + buffer.len());
            joined.extend_from_slice(&existing);
            joined.extend_from_slice(&buffer);
            joined.freeze()
        };

        self.primary.put(&location, committed).await?;
        tracker.committed.push(id);

        Ok(tracker)
    }

    async fn close_append(&self, _tracker: AppendTracker) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::layout::{tenant_keypath, tenants_keypath};
    use object_store::memory::InMemory;

    fn backend() -> ObjectBackend {
        ObjectBackend::new(
            Arc::new(InMemory::new()),
            BackendConfig {
                hedge_delay: std::time::Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let be = backend();
        let keypath = tenant_keypath("acme");
        be.write("data", &keypath, Bytes::from("hello"))
            .await
            .unwrap();

        let read = be.read("data", &keypath).await.unwrap();
        assert_eq!(read, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_large_write_goes_multipart() {
        let be = ObjectBackend::new(
            Arc::new(InMemory::new()),
            BackendConfig {
                buffer_size: 16,
                max_buffers: 2,
                hedge_delay: std::time::Duration::from_millis(1),
            },
        );
        let keypath = tenant_keypath("acme");
        let data = Bytes::from(vec![0xabu8; 1024]);
        be.write("data", &keypath, data.clone()).await.unwrap();

        let read = be.read("data", &keypath).await.unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_missing_object_is_does_not_exist() {
        let be = backend();
        let err = be
            .read("data", &tenant_keypath("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::DoesNotExist));
    }

    #[tokio::test]
    async fn test_list_returns_immediate_children_only() {
        let be = backend();
        be.write("meta", &vec!["tenant".into(), "acme".into(), "b1".into()], Bytes::from("x"))
            .await
            .unwrap();
        be.write("meta", &vec!["tenant".into(), "acme".into(), "b2".into()], Bytes::from("x"))
            .await
            .unwrap();
        be.write("meta", &vec!["tenant".into(), "globex".into(), "b3".into()], Bytes::from("x"))
            .await
            .unwrap();

        let mut tenants = be.list(&tenants_keypath()).await.unwrap();
        tenants.sort();
        assert_eq!(tenants, vec!["acme".to_string(), "globex".to_string()]);

        let mut blocks = be.list(&tenant_keypath("acme")).await.unwrap();
        blocks.sort();
        assert_eq!(blocks, vec!["b1".to_string(), "b2".to_string()]);
    }

    #[tokio::test]
    async fn test_read_range_clamps_to_object_size() {
        let be = backend();
        let keypath = tenant_keypath("acme");
        be.write("data", &keypath, Bytes::from("0123456789"))
            .await
            .unwrap();

        let mut dest = vec![0u8; 4];
        be.read_range("data", &keypath, 2, &mut dest).await.unwrap();
        assert_eq!(&dest, b"2345");

        // Destination larger than the remaining bytes: only the prefix is
        // filled.
        let mut dest = vec![b'_'; 8];
        be.read_range("data", &keypath, 6, &mut dest).await.unwrap();
        assert_eq!(&dest, b"6789____");
    }

    #[tokio::test]
    async fn test_append_stages_and_concatenates() {
        let be = backend();
        let keypath = tenant_keypath("acme");

        let tracker = be
            .append("blob", &keypath, None, Bytes::from("aaa"))
            .await
            .unwrap();
        let tracker = be
            .append("blob", &keypath, Some(tracker), Bytes::from("bbb"))
            .await
            .unwrap();
        let tracker = be
            .append("blob", &keypath, Some(tracker), Bytes::from("ccc"))
            .await
            .unwrap();

        // Block IDs derive from {1, 2, 3} as little-endian u32 in a 64-byte
        // buffer; all the same length.
        let expected: Vec<String> = (1u32..=3)
            .map(|i| {
                let mut buf = [0u8; 64];
                buf[..4].copy_from_slice(&i.to_le_bytes());
                BASE64.encode(buf)
            })
            .collect();
        assert_eq!(tracker.committed_blocks(), expected.as_slice());
        assert_eq!(tracker.committed_blocks()[0].len(), tracker.committed_blocks()[2].len());

        let read = be.read("blob", &keypath).await.unwrap();
        assert_eq!(read, Bytes::from("aaabbbccc"));

        be.close_append(tracker).await.unwrap();
    }
}
