//! Hedged Reads
//!
//! Object stores have long latency tails; a small fraction of GETs take 10x
//! the median. A hedged read fires a second identical request after a short
//! delay and takes whichever response lands first. Both requests are
//! idempotent GETs, so the losing leg is simply dropped.
//!
//! If the primary leg fails *before* the hedge delay elapses the error is
//! returned as-is (fail fast); once both legs are in flight, a failure on
//! one leg waits for the other.

use bytes::Bytes;
use object_store::{path::Path, ObjectStore};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Read handle that races a delayed second request against the first.
#[derive(Clone)]
pub struct HedgedReader {
    store: Arc<dyn ObjectStore>,
    delay: Duration,
}

impl HedgedReader {
    pub fn new(store: Arc<dyn ObjectStore>, delay: Duration) -> Self {
        Self { store, delay }
    }

    pub async fn get_bytes(&self, location: &Path) -> object_store::Result<Bytes> {
        let primary = Self::fetch(self.store.clone(), location.clone());
        tokio::pin!(primary);

        tokio::select! {
            res = &mut primary => res,
            _ = tokio::time::sleep(self.delay) => {
                debug!(location = %location, "hedging slow read");
                let backup = Self::fetch(self.store.clone(), location.clone());
                tokio::pin!(backup);
                tokio::select! {
                    res = &mut primary => match res {
                        Ok(bytes) => Ok(bytes),
                        Err(_) => backup.await,
                    },
                    res = &mut backup => match res {
                        Ok(bytes) => Ok(bytes),
                        Err(_) => primary.await,
                    },
                }
            }
        }
    }

    pub async fn get_range(
        &self,
        location: &Path,
        range: Range<usize>,
    ) -> object_store::Result<Bytes> {
        let store = self.store.clone();
        let primary = store.get_range(location, range.clone());
        tokio::pin!(primary);

        tokio::select! {
            res = &mut primary => res,
            _ = tokio::time::sleep(self.delay) => {
                debug!(location = %location, "hedging slow ranged read");
                let backup = self.store.get_range(location, range);
                tokio::pin!(backup);
                tokio::select! {
                    res = &mut primary => match res {
                        Ok(bytes) => Ok(bytes),
                        Err(_) => backup.await,
                    },
                    res = &mut backup => match res {
                        Ok(bytes) => Ok(bytes),
                        Err(_) => primary.await,
                    },
                }
            }
        }
    }

    async fn fetch(store: Arc<dyn ObjectStore>, location: Path) -> object_store::Result<Bytes> {
        store.get(&location).await?.bytes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_hedged_get_returns_object() {
        let store = Arc::new(InMemory::new());
        let location = Path::from("tenant/acme/obj");
        store
            .put(&location, Bytes::from("payload"))
            .await
            .unwrap();

        let hedged = HedgedReader::new(store, Duration::from_millis(1));
        let bytes = hedged.get_bytes(&location).await.unwrap();
        assert_eq!(bytes, Bytes::from("payload"));
    }

    #[tokio::test]
    async fn test_hedged_get_range() {
        let store = Arc::new(InMemory::new());
        let location = Path::from("tenant/acme/obj");
        store
            .put(&location, Bytes::from("0123456789"))
            .await
            .unwrap();

        let hedged = HedgedReader::new(store, Duration::from_millis(1));
        let bytes = hedged.get_range(&location, 2..6).await.unwrap();
        assert_eq!(bytes, Bytes::from("2345"));
    }

    #[tokio::test]
    async fn test_missing_object_errors() {
        let store = Arc::new(InMemory::new());
        let hedged = HedgedReader::new(store, Duration::from_millis(1));
        let err = hedged.get_bytes(&Path::from("nope")).await.unwrap_err();
        assert!(matches!(err, object_store::Error::NotFound { .. }));
    }
}
