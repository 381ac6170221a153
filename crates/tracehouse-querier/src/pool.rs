//! Ingester Client Pool
//!
//! Caches one client per ingester address so connections are reused across
//! fan-outs. The map is mutated only under the pool's own lock; a failed
//! client can be evicted so the next request reconnects.

use crate::client::IngesterClient;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Builds a client for an address on first use.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, addr: &str) -> Result<Arc<dyn IngesterClient>>;
}

pub struct ClientPool {
    clients: RwLock<HashMap<String, Arc<dyn IngesterClient>>>,
    factory: Arc<dyn ClientFactory>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Cached client for `addr`, created on first use.
    pub async fn get_client_for(&self, addr: &str) -> Result<Arc<dyn IngesterClient>> {
        // Fast path: read lock.
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(addr) {
                return Ok(client.clone());
            }
        }

        // Slow path: write lock with a second check, since another fan-out
        // may have connected in between.
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(addr) {
            return Ok(client.clone());
        }

        debug!(addr = %addr, "creating ingester client");
        let client = self.factory.create(addr).await?;
        clients.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    /// Drop the cached client for `addr`; the next request reconnects.
    pub async fn remove(&self, addr: &str) {
        self.clients.write().await.remove(addr);
        debug!(addr = %addr, "ingester client evicted");
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracehouse_core::{
        SearchRequest, SearchResponse, SearchTagValuesResponse, SearchTagsResponse,
        TraceByIdRequest, TraceByIdResponse,
    };

    struct NullClient;

    #[async_trait]
    impl IngesterClient for NullClient {
        async fn find_trace_by_id(
            &self,
            _tenant_id: &str,
            _req: TraceByIdRequest,
        ) -> Result<TraceByIdResponse> {
            Ok(TraceByIdResponse::default())
        }

        async fn search(&self, _tenant_id: &str, _req: SearchRequest) -> Result<SearchResponse> {
            Ok(SearchResponse::default())
        }

        async fn search_tags(&self, _tenant_id: &str) -> Result<SearchTagsResponse> {
            Ok(SearchTagsResponse::default())
        }

        async fn search_tag_values(
            &self,
            _tenant_id: &str,
            _key: &str,
        ) -> Result<SearchTagValuesResponse> {
            Ok(SearchTagValuesResponse::default())
        }
    }

    struct CountingFactory {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn create(&self, _addr: &str) -> Result<Arc<dyn IngesterClient>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullClient))
        }
    }

    #[tokio::test]
    async fn test_clients_are_cached_per_address() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory.clone());

        pool.get_client_for("ingester-1:9095").await.unwrap();
        pool.get_client_for("ingester-1:9095").await.unwrap();
        pool.get_client_for("ingester-2:9095").await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_removed_clients_reconnect() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory.clone());

        pool.get_client_for("ingester-1:9095").await.unwrap();
        pool.remove("ingester-1:9095").await;
        assert!(pool.is_empty().await);
        pool.get_client_for("ingester-1:9095").await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }
}
