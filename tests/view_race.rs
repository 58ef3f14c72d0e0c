//! End-to-end view race scenario (spec.md §8, scenario 6): starting a load for one
//! query, then switching the query and starting a second load before the first
//! settles, must leave `items` reflecting the second query even if the first
//! load's response arrives later.

use std::sync::Arc;

use async_trait::async_trait;
use keyper::{
    Collection, CollectionConfig, CollectionView, DataSource, FetchParams, Key, RawEntity,
    RelationMask, SliceArray, SourceError,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// A `DataSource` whose `find` blocks until told to proceed for a specific
/// `where` predicate, so the test can control the order two competing loads
/// settle in.
struct ControlledSource {
    gate_q1: Notify,
    gate_q2: Notify,
}

impl ControlledSource {
    fn new() -> Arc<Self> {
        Arc::new(ControlledSource {
            gate_q1: Notify::new(),
            gate_q2: Notify::new(),
        })
    }
}

#[async_trait]
impl DataSource for ControlledSource {
    async fn find_one(&self, _pk: &Key, _o: &Value) -> Result<RawEntity, SourceError> {
        Err(SourceError::NotFound)
    }

    async fn find(&self, params: &FetchParams, _o: &Value) -> Result<SliceArray<RawEntity>, SourceError> {
        let tag = params.criteria.get("tag").and_then(Value::as_str).unwrap_or("");
        let (gate, rows) = if tag == "q1" {
            (&self.gate_q1, vec![json!({"id": 1, "tag": "q1"}).as_object().unwrap().clone()])
        } else {
            (&self.gate_q2, vec![json!({"id": 2, "tag": "q2"}).as_object().unwrap().clone()])
        };
        gate.notified().await;
        Ok(SliceArray::new(rows))
    }

    async fn find_all(&self, _pks: &[Key], _o: &Value) -> Result<Vec<RawEntity>, SourceError> {
        Ok(vec![])
    }

    async fn create(&self, payload: &RawEntity, _o: &Value) -> Result<RawEntity, SourceError> {
        Ok(payload.clone())
    }

    async fn update(&self, _pk: &Key, payload: &RawEntity, _o: &Value) -> Result<RawEntity, SourceError> {
        Ok(payload.clone())
    }

    async fn delete(&self, _pk: &Key, _o: &Value) -> Result<(), SourceError> {
        Ok(())
    }
}

#[tokio::test]
async fn later_query_wins_even_when_earlier_load_resolves_last() {
    let source = ControlledSource::new();
    let collection = Collection::new("posts", CollectionConfig::new("id"), source.clone());

    let view = CollectionView::new(collection.clone(), json!({"tag": "q1"}), json!("id"), RelationMask::new()).unwrap();

    // Kick off the first load (query q1); it blocks inside `find` until released.
    let load_q1 = {
        let view = view.clone();
        tokio::spawn(async move { view.load(false).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Switch the query and start a second load (q2) before q1 has settled.
    view.set_query(json!({"tag": "q2"}), false).await.unwrap();
    let load_q2 = {
        let view = view.clone();
        tokio::spawn(async move { view.load(false).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Resolve q2 first, then q1 — the stale q1 continuation must be discarded by
    // the race-safe sequence number rather than clobbering q2's result.
    source.gate_q2.notify_waiters();
    load_q2.await.unwrap().unwrap();
    source.gate_q1.notify_waiters();
    load_q1.await.unwrap().unwrap();

    let items = view.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].field("tag").unwrap(), "q2");
}
