//! Querier
//!
//! One querier serves a tenant's reads by fanning out to the replica set and
//! (for by-ID queries that reach into history) the object store, then
//! merging whatever came back. Partial tolerance is the point: behind
//! quorum, a failed ingester is invisible to the caller. A store failure
//! under `Blocks`/`All` surfaces, because no replica can cover for it.

use crate::client::IngesterClient;
use crate::config::QuerierConfig;
use crate::error::{Error, Result};
use crate::pool::{ClientFactory, ClientPool};
use crate::ring::{ReadRing, ReplicaResponse};
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracehouse_backend::Store;
use tracehouse_core::{
    combine_trace_bytes, combine_trace_protos, QueryMode, SearchMetrics, SearchRequest,
    SearchResponse, SearchTagValuesResponse, SearchTagsResponse, Trace, TraceByIdRequest,
    TraceByIdResponse, TraceId, TraceSearchMetadata,
};
use tracing::debug;

pub struct Querier {
    cfg: QuerierConfig,
    ring: Arc<dyn ReadRing>,
    pool: ClientPool,
    store: Arc<dyn Store>,
    query_gate: Semaphore,
}

impl Querier {
    pub fn new(
        cfg: QuerierConfig,
        ring: Arc<dyn ReadRing>,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn Store>,
    ) -> Self {
        let max_concurrent = cfg.max_concurrent_queries.max(1);
        // Readers of recent data rely on the blocklist the external poller
        // maintains; make sure it is running before the first query.
        store.enable_polling();
        Self {
            cfg,
            ring,
            pool: ClientPool::new(factory),
            store,
            query_gate: Semaphore::new(max_concurrent),
        }
    }

    /// Merge the trace from every source the query mode names into one.
    pub async fn find_trace_by_id(
        &self,
        tenant_id: &str,
        req: &TraceByIdRequest,
    ) -> Result<TraceByIdResponse> {
        let _permit = self.query_gate.acquire().await.expect("query gate never closes");
        // Fail malformed IDs before any fan-out.
        let trace_id = TraceId::from_slice(&req.trace_id)?;
        let mode = req.mode();

        let mut complete: Option<Trace> = None;

        if matches!(mode, QueryMode::Ingesters | QueryMode::All) {
            let responses = self
                .for_given_replicas(|client| {
                    let req = req.clone();
                    let tenant = tenant_id.to_string();
                    async move { client.find_trace_by_id(&tenant, req).await }
                })
                .await?;

            let mut combined_traces = 0usize;
            for r in responses {
                if let Some(trace) = r.response.trace {
                    let (next, _) = combine_trace_protos(complete.take(), &trace);
                    complete = Some(next);
                    combined_traces += 1;
                }
            }
            debug!(
                tenant = tenant_id,
                trace = %trace_id,
                combined_traces,
                "ingester partials combined"
            );
        }

        if matches!(mode, QueryMode::Blocks | QueryMode::All) {
            let (partials, encodings) = self
                .store
                .find(tenant_id, trace_id, &req.block_start, &req.block_end)
                .await?;

            if !partials.is_empty() {
                // Generally every partial carries the same encoding; the
                // first one is the base everything is re-encoded into.
                let base = encodings[0];
                let mut all_bytes: Option<Bytes> = None;
                for (partial, encoding) in partials.iter().zip(&encodings) {
                    let (bytes, _) =
                        combine_trace_bytes(all_bytes.as_deref(), partial, base, *encoding)?;
                    all_bytes = Some(bytes);
                }

                let store_trace = base.decode(&all_bytes.unwrap_or_default())?;
                let (next, _) = combine_trace_protos(complete.take(), &store_trace);
                complete = Some(next);
            }
        }

        Ok(TraceByIdResponse { trace: complete })
    }

    pub async fn search(&self, tenant_id: &str, req: &SearchRequest) -> Result<SearchResponse> {
        let _permit = self.query_gate.acquire().await.expect("query gate never closes");

        let responses = self
            .for_given_replicas(|client| {
                let req = req.clone();
                let tenant = tenant_id.to_string();
                async move { client.search(&tenant, req).await }
            })
            .await?;

        Ok(Self::post_process_search_results(req, responses))
    }

    pub async fn search_tags(&self, tenant_id: &str) -> Result<SearchTagsResponse> {
        let _permit = self.query_gate.acquire().await.expect("query gate never closes");

        let responses = self
            .for_given_replicas(|client| {
                let tenant = tenant_id.to_string();
                async move { client.search_tags(&tenant).await }
            })
            .await?;

        let mut names = BTreeSet::new();
        for r in responses {
            names.extend(r.response.tag_names);
        }
        Ok(SearchTagsResponse {
            tag_names: names.into_iter().collect(),
        })
    }

    pub async fn search_tag_values(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<SearchTagValuesResponse> {
        let _permit = self.query_gate.acquire().await.expect("query gate never closes");

        let responses = self
            .for_given_replicas(|client| {
                let tenant = tenant_id.to_string();
                let key = key.to_string();
                async move { client.search_tag_values(&tenant, &key).await }
            })
            .await?;

        let mut values = BTreeSet::new();
        for r in responses {
            values.extend(r.response.tag_values);
        }
        Ok(SearchTagValuesResponse {
            tag_values: values.into_iter().collect(),
        })
    }

    /// Run `f` against the cached client of every replica in the read set,
    /// under quorum rules. Generic over the reply type.
    async fn for_given_replicas<R, F, Fut>(&self, f: F) -> Result<Vec<ReplicaResponse<R>>>
    where
        F: Fn(Arc<dyn IngesterClient>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let replication_set = self.ring.replication_set_for_read()?;
        let f = &f;
        replication_set
            .do_requests(self.cfg.extra_query_delay, move |replica| async move {
                let client = self.pool.get_client_for(&replica.addr).await?;
                f(client).await
            })
            .await
    }

    /// Dedupe by trace ID taking the first occurrence, sum metrics across
    /// replicas, sort by start time descending, truncate to the limit.
    fn post_process_search_results(
        req: &SearchRequest,
        responses: Vec<ReplicaResponse<SearchResponse>>,
    ) -> SearchResponse {
        let mut metrics = SearchMetrics::default();
        let mut by_id: HashMap<String, TraceSearchMetadata> = HashMap::new();

        for r in responses {
            let SearchResponse {
                traces,
                metrics: replica_metrics,
            } = r.response;
            for t in traces {
                by_id.entry(t.trace_id.clone()).or_insert(t);
            }
            if let Some(m) = replica_metrics {
                metrics.add(&m);
            }
        }

        let mut traces: Vec<TraceSearchMetadata> = by_id.into_values().collect();
        traces.sort_by(|a, b| b.start_time_unix_nano.cmp(&a.start_time_unix_nano));
        if req.limit != 0 && (req.limit as usize) < traces.len() {
            traces.truncate(req.limit as usize);
        }

        SearchResponse {
            traces,
            metrics: Some(metrics),
        }
    }
}
