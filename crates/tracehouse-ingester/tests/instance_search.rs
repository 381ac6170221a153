//! Instance search behavior across the block lifecycle: live buffer, WAL,
//! completing and complete blocks, concurrent mutation, and restart replay.

use bytes::Bytes;
use object_store::memory::InMemory;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracehouse_backend::{BackendConfig, ObjectBackend, ObjectBlockStore, Store};
use tracehouse_core::{
    Encoding, SearchEntry, SearchRequest, Span, Trace, TraceId, SECRET_EXHAUSTIVE_SEARCH_TAG,
};
use tracehouse_ingester::{
    Ingester, IngesterConfig, Instance, Limiter, Limits, LocalDirs, StaticRingCount,
};

fn limiter() -> Arc<Limiter> {
    Limiter::new(
        Limits::default(),
        Arc::new(StaticRingCount { count: 1 }),
        1,
    )
    .into()
}

fn store() -> Arc<dyn Store> {
    let backend = ObjectBackend::new(
        Arc::new(InMemory::new()),
        BackendConfig {
            hedge_delay: Duration::from_millis(1),
            ..Default::default()
        },
    );
    Arc::new(ObjectBlockStore::new(Arc::new(backend)))
}

async fn new_instance(root: &std::path::Path) -> Instance {
    let dirs = LocalDirs::new(root);
    dirs.ensure().await.unwrap();
    Instance::new("fake", limiter(), dirs).await.unwrap()
}

fn random_id() -> TraceId {
    let mut id = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id);
    TraceId::from_slice(&id).unwrap()
}

fn make_trace(span_count: usize, trace_id: TraceId) -> Bytes {
    let mut rng = rand::thread_rng();
    let spans = (0..span_count)
        .map(|i| {
            let mut span_id = vec![0u8; 8];
            rng.fill_bytes(&mut span_id);
            let mut tags = std::collections::HashMap::new();
            tags.insert("trace".to_string(), trace_id.to_hex());
            Span {
                span_id,
                name: format!("op-{}", i),
                service_name: "svc".to_string(),
                start_time_unix_nano: 1_000 + i as u64,
                end_time_unix_nano: 2_000 + i as u64,
                tags,
            }
        })
        .collect();
    Encoding::Proto.encode(&Trace { spans })
}

fn annotation(trace_id: TraceId, key: &str, value: &str) -> Bytes {
    let mut entry = SearchEntry::new(trace_id);
    entry.start_time_unix_nano = 1_000;
    entry.end_time_unix_nano = 2_000;
    entry.root_service_name = "svc".to_string();
    entry.root_span_name = "op-0".to_string();
    entry.add_tag(key, value);
    entry.encode_bytes()
}

fn tag_request(key: &str, value: &str) -> SearchRequest {
    let mut tags = HashMap::new();
    tags.insert(key.to_string(), value.to_string());
    SearchRequest {
        tags,
        ..Default::default()
    }
}

fn check_ids_present(expected: &[TraceId], response: &tracehouse_core::SearchResponse) {
    for meta in &response.traces {
        let parsed = TraceId::from_hex(&meta.trace_id).expect("valid hex trace id");
        assert!(
            expected.contains(&parsed),
            "unexpected trace id {} in results",
            meta.trace_id
        );
    }
}

#[tokio::test]
async fn test_instance_search_across_stages() {
    let tmp = TempDir::new().unwrap();
    let instance = new_instance(tmp.path()).await;

    let num_traces = 500;
    let annotated_fraction = 5;
    let mut annotated_ids = Vec::new();

    for j in 0..num_traces {
        let id = random_id();
        let payload = make_trace(10, id);

        // Annotate a fraction of traces with search data; the rest push
        // payload only and must still flow through every cut.
        let search = if j % annotated_fraction == 0 {
            annotated_ids.push(id);
            Some(annotation(id, "foo", "bar"))
        } else {
            None
        };

        instance
            .push_bytes(id.as_ref(), payload, search)
            .await
            .unwrap();
        assert_eq!(instance.trace_count(), instance.live_traces_len().await);
    }

    let expected_hits = num_traces / annotated_fraction;
    let req = tag_request("foo", "bar");

    let sr = instance.search(&req).await.unwrap();
    assert_eq!(sr.traces.len(), expected_hits);
    check_ids_present(&annotated_ids, &sr);

    // After appending to the WAL.
    instance
        .cut_complete_traces(Duration::ZERO, true)
        .await
        .unwrap();
    assert_eq!(instance.trace_count(), instance.live_traces_len().await);
    assert_eq!(instance.trace_count(), 0);

    let sr = instance.search(&req).await.unwrap();
    assert_eq!(sr.traces.len(), expected_hits);
    check_ids_present(&annotated_ids, &sr);

    // After cutting a new head block.
    let block_id = instance
        .cut_block_if_ready(Duration::ZERO, 0, true)
        .await
        .unwrap()
        .expect("head block should cut");

    let sr = instance.search(&req).await.unwrap();
    assert_eq!(sr.traces.len(), expected_hits);
    check_ids_present(&annotated_ids, &sr);

    // After completing the block (the completing block is still present;
    // dedupe keeps the count stable).
    instance.complete_block(block_id).await.unwrap();

    let sr = instance.search(&req).await.unwrap();
    assert_eq!(sr.traces.len(), expected_hits);
    check_ids_present(&annotated_ids, &sr);

    // Tag enumeration unions every stage.
    let tags = instance.get_search_tags().await;
    assert!(tags.contains(&"foo".to_string()));
    let values = instance.get_search_tag_values("foo").await;
    assert_eq!(values, vec!["bar".to_string()]);
}

#[tokio::test]
async fn test_instance_search_no_data() {
    let tmp = TempDir::new().unwrap();
    let instance = new_instance(tmp.path()).await;

    let sr = instance
        .search(&SearchRequest::default())
        .await
        .unwrap();
    assert!(sr.traces.is_empty());
}

#[tokio::test]
async fn test_instance_search_metrics() {
    let tmp = TempDir::new().unwrap();
    let instance = new_instance(tmp.path()).await;

    let num_traces = 500u32;
    let mut num_bytes = 0u64;
    for _ in 0..num_traces {
        let id = random_id();
        let payload = make_trace(10, id);
        let search = annotation(id, "foo", "bar");
        num_bytes += search.len() as u64;

        instance
            .push_bytes(id.as_ref(), payload, Some(search))
            .await
            .unwrap();
        assert_eq!(instance.trace_count(), instance.live_traces_len().await);
    }

    async fn exhaustive_metrics(instance: &Instance) -> tracehouse_core::SearchMetrics {
        let mut tags = HashMap::new();
        tags.insert(SECRET_EXHAUSTIVE_SEARCH_TAG.to_string(), "!".to_string());
        let req = SearchRequest {
            tags,
            ..Default::default()
        };
        instance.search(&req).await.unwrap().metrics.unwrap()
    }

    // Live traces: one head block.
    let m = exhaustive_metrics(&instance).await;
    assert_eq!(m.inspected_traces, num_traces);
    assert_eq!(m.inspected_bytes, num_bytes);
    assert_eq!(m.inspected_blocks, 1);

    // After appending to the WAL: byte accounting stays exact.
    instance
        .cut_complete_traces(Duration::ZERO, true)
        .await
        .unwrap();
    let m = exhaustive_metrics(&instance).await;
    assert_eq!(m.inspected_traces, num_traces);
    assert_eq!(m.inspected_bytes, num_bytes);
    assert_eq!(m.inspected_blocks, 1);

    // After cutting a new head block: head + completing.
    let block_id = instance
        .cut_block_if_ready(Duration::ZERO, 0, true)
        .await
        .unwrap()
        .expect("head block should cut");
    let m = exhaustive_metrics(&instance).await;
    assert_eq!(m.inspected_traces, num_traces);
    assert_eq!(m.inspected_bytes, num_bytes);
    assert_eq!(m.inspected_blocks, 2);

    // After complete + clear-completing: head + complete block. Complete
    // blocks store the normalized entry form, strictly smaller than the raw
    // WAL entries.
    instance.complete_block(block_id).await.unwrap();
    instance.clear_completing_block(block_id).await.unwrap();
    let m = exhaustive_metrics(&instance).await;
    assert_eq!(m.inspected_traces, num_traces);
    assert!(m.inspected_bytes < num_bytes);
    assert_eq!(m.inspected_blocks, 2);
}

#[tokio::test]
async fn test_block_deleted_during_search() {
    let tmp = TempDir::new().unwrap();
    let instance = Arc::new(new_instance(tmp.path()).await);

    for _ in 0..500 {
        let id = random_id();
        let payload = make_trace(10, id);
        instance
            .push_bytes(id.as_ref(), payload, Some(annotation(id, "foo", "bar")))
            .await
            .unwrap();
    }

    instance
        .cut_complete_traces(Duration::ZERO, true)
        .await
        .unwrap();
    let block_id = instance
        .cut_block_if_ready(Duration::ZERO, 0, true)
        .await
        .unwrap()
        .expect("head block should cut");

    // Keep searching for a tag that matches nothing (an exhaustive scan of
    // the completing block) while the block is cleared underneath.
    let searcher = {
        let instance = instance.clone();
        tokio::spawn(async move {
            let req = tag_request("wuv", "xyz");
            for _ in 0..200 {
                let sr = instance.search(&req).await.expect("search must not fail");
                assert!(sr.traces.is_empty());
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    instance.clear_completing_block(block_id).await.unwrap();

    searcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_instance_does_not_race() {
    let tmp = TempDir::new().unwrap();
    let dirs = LocalDirs::new(tmp.path());
    dirs.ensure().await.unwrap();
    // Generous cap: the pusher must never trip the live-trace limit while
    // the cutter runs beside it.
    let limiter = Arc::new(Limiter::new(
        Limits {
            max_traces_per_instance: 10_000_000,
            ..Default::default()
        },
        Arc::new(StaticRingCount { count: 1 }),
        1,
    ));
    let instance = Arc::new(Instance::new("fake", limiter, dirs).await.unwrap());
    let store = store();

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    fn concurrent<F, Fut>(
        mut stop: tokio::sync::watch::Receiver<bool>,
        f: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            while !*stop.borrow_and_update() {
                f().await;
            }
        })
    }

    let mut handles = Vec::new();

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                let id = random_id();
                let payload = make_trace(10, id);
                instance
                    .push_bytes(id.as_ref(), payload, Some(annotation(id, "foo", "bar")))
                    .await
                    .unwrap();
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                instance
                    .cut_complete_traces(Duration::ZERO, true)
                    .await
                    .unwrap();
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                let id = TraceId::from_slice(&[0x01; 16]).unwrap();
                instance.find_trace_by_id(id.as_ref()).await.unwrap();
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        let store = store.clone();
        move || {
            let instance = instance.clone();
            let store = store.clone();
            async move {
                // Cut wal, complete, delete wal, then flush.
                let block_id = instance
                    .cut_block_if_ready(Duration::ZERO, 0, true)
                    .await
                    .unwrap();
                if let Some(block_id) = block_id {
                    instance.complete_block(block_id).await.unwrap();
                    instance.clear_completing_block(block_id).await.unwrap();
                    let block = instance
                        .get_block_to_be_flushed(block_id)
                        .await
                        .expect("complete block must be flushable");
                    store.write_block(&block).await.unwrap();
                    instance.mark_block_flushed(block_id).await;
                }
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                instance.clear_flushed_blocks(Duration::ZERO).await.unwrap();
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                instance.search(&tag_request("foo", "bar")).await.unwrap();
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                instance.get_search_tags().await;
            }
        }
    }));

    handles.push(concurrent(stop_rx.clone(), {
        let instance = instance.clone();
        move || {
            let instance = instance.clone();
            async move {
                instance.get_search_tag_values("foo").await;
            }
        }
    }));

    tokio::time::sleep(Duration::from_secs(2)).await;
    stop_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_wal_replay_recovers_trace_data_but_not_search() {
    let tmp = TempDir::new().unwrap();
    let cfg = IngesterConfig::default();

    let id = random_id();
    let payload = make_trace(10, id);

    {
        let ingester = Ingester::new(cfg.clone(), limiter(), store(), tmp.path())
            .await
            .unwrap();
        ingester
            .push_bytes("fake", id.as_ref(), payload.clone(), Some(annotation(id, "foo", "bar")))
            .await
            .unwrap();

        // Graceful stop seals the WAL tail.
        ingester.stop().await.unwrap();
    }

    // New process over the same local root replays the WAL.
    let ingester = Ingester::new(cfg, limiter(), store(), tmp.path())
        .await
        .unwrap();
    let instance = ingester
        .get_instance("fake")
        .await
        .expect("replayed tenant instance");

    // Search is rebuilt only on completion, so nothing matches yet.
    let sr = instance.search(&tag_request("foo", "bar")).await.unwrap();
    assert!(sr.traces.is_empty());

    // Trace data is fully recovered.
    let trace = instance
        .find_trace_by_id(id.as_ref())
        .await
        .unwrap()
        .expect("replayed trace");
    assert_eq!(trace.spans.len(), 10);
}

#[tokio::test]
async fn test_push_limits() {
    let tmp = TempDir::new().unwrap();
    let dirs = LocalDirs::new(tmp.path());
    dirs.ensure().await.unwrap();
    let limiter = Arc::new(Limiter::new(
        Limits {
            max_traces_per_instance: 2,
            max_bytes_per_trace: 64,
            ..Default::default()
        },
        Arc::new(StaticRingCount { count: 1 }),
        1,
    ));
    let instance = Instance::new("fake", limiter, dirs).await.unwrap();

    let id = random_id();
    instance
        .push_bytes(id.as_ref(), Bytes::from(vec![0u8; 32]), None)
        .await
        .unwrap();

    // Growing the same trace past the per-trace cap fails and leaves state
    // unchanged.
    let err = instance
        .push_bytes(id.as_ref(), Bytes::from(vec![0u8; 64]), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tracehouse_ingester::Error::TraceTooLarge { .. }
    ));
    assert_eq!(instance.trace_count(), 1);

    instance
        .push_bytes(random_id().as_ref(), Bytes::from(vec![0u8; 8]), None)
        .await
        .unwrap();

    // A third live trace exceeds the instance cap.
    let err = instance
        .push_bytes(random_id().as_ref(), Bytes::from(vec![0u8; 8]), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tracehouse_ingester::Error::MaxLiveTracesExceeded { .. }
    ));
    assert_eq!(instance.trace_count(), 2);

    // Invalid trace IDs are rejected up front.
    let err = instance
        .push_bytes(&[0x01], Bytes::from_static(b"x"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, tracehouse_ingester::Error::Model(_)));
}

#[tokio::test]
async fn test_flush_loop_writes_blocks_to_store() {
    let tmp = TempDir::new().unwrap();
    let cfg = IngesterConfig {
        max_idle_time: Duration::ZERO,
        max_block_bytes: 1,
        max_block_duration: Duration::ZERO,
        complete_block_timeout: Duration::ZERO,
        flush_check_period: Duration::from_millis(10),
    };
    let store = store();
    let ingester = Arc::new(
        Ingester::new(cfg, limiter(), store.clone(), tmp.path())
            .await
            .unwrap(),
    );

    let id = random_id();
    ingester
        .push_bytes("fake", id.as_ref(), make_trace(10, id), Some(annotation(id, "foo", "bar")))
        .await
        .unwrap();

    let flush_loop = {
        let ingester = ingester.clone();
        tokio::spawn(async move { ingester.run_flush_loop().await })
    };

    // The loop should cut, complete, and upload the block within a few
    // ticks.
    let mut partials = Vec::new();
    for _ in 0..200 {
        let (found, _) = store.find("fake", id, "", "").await.unwrap();
        if !found.is_empty() {
            partials = found;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(partials.len(), 1, "block never reached the object store");
    let trace = Encoding::Proto.decode(&partials[0]).unwrap();
    assert_eq!(trace.spans.len(), 10);

    ingester.stop().await.unwrap();
    flush_loop.await.unwrap();
}
