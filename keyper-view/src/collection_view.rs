use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use keyper_collection::{Collection, CollectionError, FetchOptions, RelationMask};
use keyper_core::{Entity, Key};
use keyper_datasource::FetchParams;
use keyper_query::{Criteria, Ordering};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::common::{remove_by_pk, sorted_upsert};

/// A live, auto-updating subset of a [`Collection`]: every entity currently
/// matching `query`, kept sorted by `order_by`, updated as the collection's
/// `inserted`/`removed` signals fire (spec.md §4.7, "CollectionView").
///
/// Construction spawns a background task subscribed to the collection's signal
/// broadcast channels; [`CollectionView::dispose`] cancels it. This is the Rust
/// realization of "attach to `collection.inserted`/`removed`" — there is no
/// synchronous listener-array equivalent once relation hydration (which needs
/// `.await`) is involved, so the binding lives in its own task rather than on the
/// caller's stack.
pub struct CollectionView {
    collection: Arc<Collection>,
    mask: RelationMask,
    state: RwLock<ViewState>,
    /// Race-safe reloads: each `load` claims the next sequence number and only
    /// commits its result if it's still the latest by the time it resolves
    /// (Design Notes, spec.md §9, "monotonic sequence number ... discarding
    /// continuations whose sequence is stale").
    load_seq: AtomicU64,
    /// Per-pk sequence numbers guarding overlapping relation-hydration-then-insert
    /// work for the same pk (spec.md §5, "a view keeps a per-pk in-flight promise;
    /// later inserts of the same pk supersede earlier ones").
    insert_seq: Mutex<std::collections::HashMap<Key, u64>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct ViewState {
    items: Vec<Entity>,
    pks: HashSet<Key>,
    loading: bool,
    query: Value,
    criteria: Criteria,
    order_by: Value,
    ordering: Ordering,
    from_cache: bool,
}

impl CollectionView {
    pub fn new(collection: Arc<Collection>, query: Value, order_by: Value, mask: RelationMask) -> Result<Arc<Self>, CollectionError> {
        let criteria = Criteria::parse(&query)?;
        let ordering = Ordering::parse(&order_by)?;
        let view = Arc::new(CollectionView {
            collection,
            mask,
            state: RwLock::new(ViewState {
                items: Vec::new(),
                pks: HashSet::new(),
                loading: false,
                query,
                criteria,
                order_by,
                ordering,
                from_cache: false,
            }),
            load_seq: AtomicU64::new(0),
            insert_seq: Mutex::new(std::collections::HashMap::new()),
            task: Mutex::new(None),
        });
        view.clone().attach();
        Ok(view)
    }

    /// Spawn the background task that keeps `items` in sync with the collection's
    /// `inserted`/`removed` signals. Called once from `new`; re-armed by nothing
    /// else (a disposed view is gone for good).
    fn attach(self: Arc<Self>) {
        let mut inserted_rx = self.collection.inserted();
        let mut removed_rx = self.collection.removed();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = inserted_rx.recv() => {
                        match event {
                            Ok(event) => this.clone().on_inserted(event.entity, event.previous).await,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        }
                    }
                    event = removed_rx.recv() => {
                        match event {
                            Ok(entity) => this.on_removed(&entity).await,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        }
                    }
                }
            }
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Detach from the collection's signals. Idempotent.
    pub fn dispose(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub async fn items(&self) -> Vec<Entity> {
        self.state.read().await.items.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    pub async fn from_cache(&self) -> bool {
        self.state.read().await.from_cache
    }

    /// Update the query predicate. A structurally-equal replacement is a no-op;
    /// otherwise the new predicate takes effect immediately for future signal
    /// handling and, if `reload` is set, a fresh `load` is issued (spec.md §4.7,
    /// "setQuery").
    pub async fn set_query(self: &Arc<Self>, query: Value, reload: bool) -> Result<(), CollectionError> {
        let changed = {
            let mut state = self.state.write().await;
            if state.query == query {
                false
            } else {
                state.criteria = Criteria::parse(&query)?;
                state.query = query;
                true
            }
        };
        if changed && reload {
            self.load(false).await?;
        }
        Ok(())
    }

    pub async fn set_order_by(self: &Arc<Self>, order_by: Value, reload: bool) -> Result<(), CollectionError> {
        let changed = {
            let mut state = self.state.write().await;
            if state.order_by == order_by {
                false
            } else {
                state.ordering = Ordering::parse(&order_by)?;
                state.order_by = order_by;
                true
            }
        };
        if changed && reload {
            self.load(false).await?;
        }
        Ok(())
    }

    /// Re-run the query and replace `items` wholesale. `from_cache = true` takes
    /// the synchronous `Collection::filter` path (plus explicit relation
    /// hydration); otherwise `Collection::fetch` goes to the Data Source as needed
    /// (spec.md §4.7, "load").
    pub async fn load(self: &Arc<Self>, from_cache: bool) -> Result<(), CollectionError> {
        let seq = self.load_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        {
            let mut state = self.state.write().await;
            state.loading = true;
        }

        let (query, order_by) = {
            let state = self.state.read().await;
            (state.query.clone(), state.order_by.clone())
        };
        let params = FetchParams::new(query).with_order_by(order_by);

        let result = if from_cache {
            let slice = self.collection.filter(&params)?;
            let items: Vec<Entity> = slice.into_vec();
            if !self.mask.is_empty() {
                self.collection.load_relations(&items, &self.mask).await?;
            }
            items
        } else {
            let slice = self
                .collection
                .fetch(params, FetchOptions {
                    force_load: false,
                    load_relations: Some(self.mask.clone()),
                })
                .await?;
            slice.into_vec()
        };

        // Discard if superseded by a later `load` while we were awaiting
        // (spec.md §5, "View `load` is race-safe").
        if self.load_seq.load(AtomicOrdering::SeqCst) != seq {
            return Ok(());
        }
        let mut state = self.state.write().await;
        state.pks = result.iter().map(|e| e.pk().clone()).collect();
        state.items = result;
        state.loading = false;
        state.from_cache = from_cache;
        Ok(())
    }

    async fn on_inserted(self: Arc<Self>, entity: Entity, previous: Option<Entity>) {
        if let Some(previous) = &previous {
            let mut state = self.state.write().await;
            if state.pks.remove(previous.pk()) {
                remove_by_pk(&mut state.items, previous.pk());
            }
        }

        let matches = {
            let state = self.state.read().await;
            state.criteria.matches(&entity.to_value())
        };
        if !matches {
            return;
        }

        let pk = entity.pk().clone();
        let seq = {
            let mut guard = self.insert_seq.lock().unwrap();
            let next = guard.get(&pk).copied().unwrap_or(0) + 1;
            guard.insert(pk.clone(), next);
            next
        };

        if !self.mask.is_empty() {
            if let Err(err) = self.collection.load_relations(std::slice::from_ref(&entity), &self.mask).await {
                tracing::warn!(pk = %pk, error = %err, "relation hydration failed for live-inserted entity");
                return;
            }
        }

        // A later insert of the same pk superseded us while we were hydrating.
        if self.insert_seq.lock().unwrap().get(&pk).copied() != Some(seq) {
            return;
        }

        let mut state = self.state.write().await;
        state.pks.insert(pk);
        sorted_upsert(&mut state.items, entity, &state.ordering);
    }

    async fn on_removed(&self, entity: &Entity) {
        let mut state = self.state.write().await;
        if state.pks.remove(entity.pk()) {
            remove_by_pk(&mut state.items, entity.pk());
        }
    }
}

impl Drop for CollectionView {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keyper_collection::CollectionConfig;
    use keyper_core::{Key, SliceArray};
    use keyper_datasource::{DataSource, RawEntity, SourceError};
    use serde_json::json;

    struct NoopSource;
    #[async_trait]
    impl DataSource for NoopSource {
        async fn find_one(&self, _pk: &Key, _opts: &Value) -> Result<RawEntity, SourceError> {
            Err(SourceError::NotFound)
        }
        async fn find(&self, _p: &FetchParams, _o: &Value) -> Result<SliceArray<RawEntity>, SourceError> {
            Ok(SliceArray::new(vec![]))
        }
        async fn find_all(&self, _p: &[Key], _o: &Value) -> Result<Vec<RawEntity>, SourceError> {
            Ok(vec![])
        }
        async fn create(&self, p: &RawEntity, _o: &Value) -> Result<RawEntity, SourceError> {
            Ok(p.clone())
        }
        async fn update(&self, _pk: &Key, p: &RawEntity, _o: &Value) -> Result<RawEntity, SourceError> {
            Ok(p.clone())
        }
        async fn delete(&self, _pk: &Key, _o: &Value) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn collection() -> Arc<Collection> {
        Collection::new("posts", CollectionConfig::new("id"), Arc::new(NoopSource))
    }

    #[tokio::test]
    async fn load_from_cache_picks_up_matching_entities() {
        let c = collection();
        for i in 1..=3 {
            c.insert(json!({"id": i, "text": format!("post {i}")}).as_object().unwrap().clone()).unwrap();
        }
        let view = CollectionView::new(c, json!({}), json!("id"), RelationMask::new()).unwrap();
        view.load(true).await.unwrap();
        assert_eq!(view.items().await.len(), 3);
    }

    #[tokio::test]
    async fn insert_after_load_is_reflected_live() {
        let c = collection();
        let view = CollectionView::new(c.clone(), json!({}), json!("id"), RelationMask::new()).unwrap();
        view.load(true).await.unwrap();
        c.insert(json!({"id": 1, "text": "post 1"}).as_object().unwrap().clone()).unwrap();
        // Give the background listener task a turn to process the broadcast.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(view.items().await.len(), 1);
    }

    #[tokio::test]
    async fn removed_entity_drops_out_of_items() {
        let c = collection();
        let e = c.insert(json!({"id": 1}).as_object().unwrap().clone()).unwrap();
        let view = CollectionView::new(c.clone(), json!({}), json!("id"), RelationMask::new()).unwrap();
        view.load(true).await.unwrap();
        assert_eq!(view.items().await.len(), 1);
        c.remove(&e, true);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(view.items().await.len(), 0);
    }

    #[tokio::test]
    async fn set_query_is_a_noop_when_structurally_equal() {
        let c = collection();
        let view = CollectionView::new(c, json!({"a": 1}), json!("id"), RelationMask::new()).unwrap();
        view.set_query(json!({"a": 1}), false).await.unwrap();
        assert_eq!(view.items().await.len(), 0);
    }
}
