//! End-to-end recall and refresh against in-memory SQLite and the local index.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use cog_core::{EngineConfig, MetadataPatch, activation_cutoff, compute_weight};
use cog_store::{
    ActivationEngine, CogletStore, IndexError, IndexHit, IndexQuery, IndexRecord, LocalIndex,
    MetadataStore, NewCoglet, StoreError, VectorIndex,
};

fn engine_with(index: Arc<dyn VectorIndex>, config: EngineConfig) -> ActivationEngine {
    let store = CogletStore::new(MetadataStore::open_in_memory().unwrap(), index, config).unwrap();
    ActivationEngine::new(Arc::new(store))
}

fn engine() -> ActivationEngine {
    engine_with(
        Arc::new(LocalIndex::open_in_memory(256).unwrap()),
        EngineConfig::default(),
    )
}

async fn demo_set(engine: &ActivationEngine) -> Vec<String> {
    let store = engine.store();
    store.create_set("demo", Some("demo set")).unwrap();
    let items = (0..5).map(|i| NewCoglet::new(format!("memory-{i}"))).collect();
    store.add_batch("demo", items).await.unwrap()
}

#[tokio::test]
async fn recall_demo_set() {
    let engine = engine();
    let ids = demo_set(&engine).await;
    assert_eq!(ids.len(), 5);

    let result = engine.recall("demo", "memory-2", Some(5)).await.unwrap();
    assert!(!result.all_results.is_empty());
    assert!(result.all_results.len() <= 5);
    for pair in result.all_results.windows(2) {
        assert!(pair[0].weight >= pair[1].weight);
    }
    assert_eq!(
        result.activated.len(),
        activation_cutoff(result.all_results.len(), 0.618)
    );
    assert_eq!(
        result.activated[..],
        result.all_results[..result.activated.len()]
    );
}

#[tokio::test]
async fn recall_persists_only_activated() {
    let engine = engine();
    demo_set(&engine).await;
    let base = engine
        .store()
        .get(&cog_core::deterministic_id("demo", "memory-0"))
        .unwrap()
        .last_update_time();
    let now = base + 2.0 * 3600.0;

    let result = engine
        .recall_at("demo", "memory-2", Some(5), now)
        .await
        .unwrap();
    assert_eq!(result.all_results.len(), 5);
    assert_eq!(result.activated.len(), 3);

    // equal weights, so the exact match wins on similarity
    assert_eq!(result.activated[0].coglet.content, "memory-2");

    let activated: Vec<&str> = result
        .activated
        .iter()
        .map(|r| r.coglet.id.as_str())
        .collect();
    for ranked in &result.all_results {
        let stored = engine.store().get(&ranked.coglet.id).unwrap();
        if activated.contains(&ranked.coglet.id.as_str()) {
            assert_eq!(stored.last_update_time(), now);
            assert_eq!(stored.metadata.access_count, 1);
            assert!((stored.weight() - ranked.weight).abs() < 1e-12);
        } else {
            assert_eq!(stored.last_update_time(), base);
            assert_eq!(stored.weight(), 0.5);
            assert_eq!(stored.metadata.access_count, 0);
        }
    }
}

#[tokio::test]
async fn refresh_skips_unknown_ids() {
    let engine = engine();
    let ids = demo_set(&engine).await;
    let (a, b) = (ids[0].clone(), ids[1].clone());
    let base = engine.store().get(&a).unwrap().last_update_time();
    let now = base + 60.0;

    let report = engine
        .refresh_at(&[a.clone(), b.clone(), "nonexistent".to_string()], now)
        .await;
    assert_eq!(report.succeeded, vec![a.clone(), b.clone()]);
    assert_eq!(report.failed_ids(), vec!["nonexistent".to_string()]);

    for id in [&a, &b] {
        assert_eq!(engine.store().get(id).unwrap().last_update_time(), now);
    }

    match report.into_result() {
        Err(StoreError::PartialRefreshFailure { succeeded, failed }) => {
            assert_eq!(succeeded.len(), 2);
            assert_eq!(failed, vec!["nonexistent"]);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
}

#[tokio::test]
async fn refresh_dedupes_ids() {
    let engine = engine();
    let ids = demo_set(&engine).await;
    let report = engine
        .refresh(&[ids[0].clone(), ids[0].clone(), ids[1].clone()])
        .await;
    assert_eq!(report.succeeded, vec![ids[0].clone(), ids[1].clone()]);
    assert_eq!(engine.store().get(&ids[0]).unwrap().metadata.access_count, 1);
}

#[tokio::test]
async fn delete_set_cascades() {
    let engine = engine();
    let ids = demo_set(&engine).await;
    assert_eq!(engine.store().delete_set("demo").await.unwrap(), 5);

    for id in &ids {
        assert!(matches!(
            engine.store().get(id),
            Err(StoreError::NotFound(_))
        ));
    }
    assert!(matches!(
        engine.store().get_set_info("demo"),
        Err(StoreError::UnknownSet(_))
    ));
    assert!(matches!(
        engine.recall("demo", "memory", None).await,
        Err(StoreError::UnknownSet(_))
    ));

    // the namespace can be reused
    engine.store().create_set("demo", None).unwrap();
    let again = engine.recall("demo", "memory-1", None).await.unwrap();
    assert!(again.all_results.is_empty());
    assert!(again.activated.is_empty());
}

#[tokio::test]
async fn repeated_recall_applies_one_step_per_activation() {
    let engine = engine();
    let store = engine.store();
    store.create_set("solo", None).unwrap();
    let id = store.add("solo", "only memory", Map::new()).await.unwrap();
    let t = store.get(&id).unwrap().last_update_time();

    let first = engine.recall_at("solo", "only", None, t).await.unwrap();
    assert_eq!(first.activated.len(), 1);
    let second = engine.recall_at("solo", "only", None, t).await.unwrap();
    assert_eq!(second.activated.len(), 1);

    let stored = store.get(&id).unwrap();
    assert!((stored.weight() - 0.5 * 0.85 * 0.85).abs() < 1e-12);
    assert_eq!(stored.metadata.access_count, 2);
    assert_eq!(stored.last_update_time(), t);
}

#[tokio::test]
async fn concurrent_refresh_loses_no_update() {
    let engine = Arc::new(engine());
    let ids = demo_set(&engine).await;
    let id = ids[0].clone();
    let base = engine.store().get(&id).unwrap().last_update_time();
    let now = base + 3600.0;

    let (e1, e2) = (engine.clone(), engine.clone());
    let (i1, i2) = (vec![id.clone()], vec![id.clone()]);
    let (r1, r2) = tokio::join!(e1.refresh_at(&i1, now), e2.refresh_at(&i2, now));
    assert!(r1.is_complete() && r2.is_complete());

    let params = engine.config().decay_params();
    let one_step = compute_weight(Some(0.5), Some(base), now, &params).unwrap();
    let two_steps = compute_weight(Some(one_step), Some(now), now, &params).unwrap();

    let stored = engine.store().get(&id).unwrap();
    assert_eq!(stored.metadata.access_count, 2);
    assert!((stored.weight() - two_steps).abs() < 1e-12);
}

#[tokio::test]
async fn update_then_recall_sees_patched_weight() {
    let engine = engine();
    let ids = demo_set(&engine).await;
    let base = engine.store().get(&ids[4]).unwrap().last_update_time();
    engine
        .store()
        .update(
            &ids[4],
            MetadataPatch::from_json(json!({"weight": 1.0, "note": "pinned"})).unwrap(),
        )
        .await
        .unwrap();

    let result = engine
        .recall_at("demo", "memory-0", None, base)
        .await
        .unwrap();
    assert_eq!(result.all_results[0].coglet.id, ids[4]);
    assert_eq!(result.all_results[0].coglet.metadata.extra["note"], "pinned");
}

#[tokio::test]
async fn legacy_strategy_ranks_by_signals() {
    let config = EngineConfig {
        strategy: cog_core::WeightingStrategy::Legacy,
        ..EngineConfig::default()
    };
    let engine = engine_with(Arc::new(LocalIndex::open_in_memory(256).unwrap()), config);
    engine.store().create_set("s", None).unwrap();
    let meta = |v: Value| v.as_object().cloned().unwrap();
    engine
        .store()
        .add("s", "plain note", meta(json!({})))
        .await
        .unwrap();
    let hub = engine
        .store()
        .add("s", "hub note", meta(json!({"connections": 20, "importance": 1.0})))
        .await
        .unwrap();

    let result = engine.recall("s", "note", None).await.unwrap();
    assert_eq!(result.all_results[0].coglet.id, hub);
    assert_eq!(result.activated.len(), 1);
}

/// Index double whose queries always fail and whose writes are counted.
struct FailingIndex {
    upserts: AtomicUsize,
}

#[async_trait]
impl VectorIndex for FailingIndex {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn upsert(&self, _records: Vec<IndexRecord>) -> Result<(), IndexError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, _query: IndexQuery) -> Result<Vec<IndexHit>, IndexError> {
        Err(IndexError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }

    async fn update_metadata(
        &self,
        _id: &str,
        _metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        Err(IndexError::Backend("read-only".into()))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        Ok(ids.len())
    }
}

#[tokio::test]
async fn recall_surfaces_retrieval_unavailable() {
    let index = Arc::new(FailingIndex {
        upserts: AtomicUsize::new(0),
    });
    let engine = engine_with(index.clone(), EngineConfig::default());
    let ids = demo_set(&engine).await;
    assert_eq!(index.upserts.load(Ordering::SeqCst), 1);

    let err = engine.recall("demo", "memory-1", None).await.unwrap_err();
    assert!(matches!(err, StoreError::RetrievalUnavailable(_)));

    // refresh still succeeds locally when the index mirror rejects the sync
    let report = engine.refresh(&ids[..1]).await;
    assert_eq!(report.succeeded, vec![ids[0].clone()]);
}

/// Index double that refuses writes.
struct RejectingIndex;

#[async_trait]
impl VectorIndex for RejectingIndex {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn upsert(&self, _records: Vec<IndexRecord>) -> Result<(), IndexError> {
        Err(IndexError::Status {
            status: 400,
            body: "bad request".into(),
        })
    }

    async fn query(&self, _query: IndexQuery) -> Result<Vec<IndexHit>, IndexError> {
        Ok(Vec::new())
    }

    async fn update_metadata(
        &self,
        _id: &str,
        _metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        Ok(())
    }

    async fn delete(&self, _ids: &[String]) -> Result<usize, IndexError> {
        Ok(0)
    }
}

#[tokio::test]
async fn failed_upsert_rolls_back_new_coglets() {
    let engine = engine_with(Arc::new(RejectingIndex), EngineConfig::default());
    engine.store().create_set("demo", None).unwrap();
    let err = engine
        .store()
        .add("demo", "never stored", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Index(_)));
    assert_eq!(engine.store().get_set_info("demo").unwrap().count, 0);
}

/// Local index whose writes can be switched off, and whose first delete
/// stalls long enough for other work to interleave.
struct FlakyIndex {
    inner: LocalIndex,
    reject_upserts: AtomicBool,
    deletes: AtomicUsize,
    first_delete_delay: Duration,
}

impl FlakyIndex {
    fn new(first_delete_delay: Duration) -> Self {
        Self {
            inner: LocalIndex::open_in_memory(256).unwrap(),
            reject_upserts: AtomicBool::new(false),
            deletes: AtomicUsize::new(0),
            first_delete_delay,
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        if self.reject_upserts.load(Ordering::SeqCst) {
            return Err(IndexError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.inner.upsert(records).await
    }

    async fn query(&self, query: IndexQuery) -> Result<Vec<IndexHit>, IndexError> {
        self.inner.query(query).await
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        self.inner.update_metadata(id, metadata).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        if self.deletes.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.first_delete_delay).await;
        }
        self.inner.delete(ids).await
    }
}

#[tokio::test]
async fn failed_readd_restores_merged_metadata() {
    let index = Arc::new(FlakyIndex::new(Duration::ZERO));
    let engine = engine_with(index.clone(), EngineConfig::default());
    let store = engine.store();
    store.create_set("demo", None).unwrap();
    let meta = |v: Value| v.as_object().cloned().unwrap();
    let id = store
        .add("demo", "kept", meta(json!({"source": "first"})))
        .await
        .unwrap();
    let before = store.get(&id).unwrap();

    index.reject_upserts.store(true, Ordering::SeqCst);
    let err = store
        .add("demo", "kept", meta(json!({"source": "second", "tag": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Index(_)));

    let after = store.get(&id).unwrap();
    assert_eq!(after, before);
    assert!(!after.metadata.extra.contains_key("tag"));
    assert_eq!(after.metadata.extra["source"], "first");

    let hits = store
        .index()
        .query(IndexQuery {
            text: "kept".into(),
            namespace: "demo".into(),
            top_k: 1,
        })
        .await
        .unwrap();
    assert_eq!(hits[0].metadata["source"], "first");
}

#[tokio::test]
async fn delete_set_removes_vectors_added_mid_delete() {
    let index = Arc::new(FlakyIndex::new(Duration::from_millis(50)));
    let engine = engine_with(index.clone(), EngineConfig::default());
    let ids = demo_set(&engine).await;
    let store = engine.store();

    // the add runs while the first index delete is stalled
    let (deleted, late) = tokio::join!(
        store.delete_set("demo"),
        store.add("demo", "late arrival", Map::new())
    );
    let late = late.unwrap();
    assert_eq!(deleted.unwrap(), ids.len() + 1);
    assert_eq!(index.deletes.load(Ordering::SeqCst), 2);

    assert!(matches!(store.get(&late), Err(StoreError::NotFound(_))));
    let leftovers = store
        .index()
        .query(IndexQuery {
            text: "late arrival".into(),
            namespace: "demo".into(),
            top_k: 10,
        })
        .await
        .unwrap();
    assert!(leftovers.is_empty());
}
