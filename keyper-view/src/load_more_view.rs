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

/// An accumulating paged view: each [`LoadMoreView::load_more`] call fetches the
/// next page and merges it into the running, sorted, pk-deduplicated `items` set
/// rather than replacing the previous page (spec.md §4.7, "LoadMoreView").
pub struct LoadMoreView {
    collection: Arc<Collection>,
    mask: RelationMask,
    page_size: usize,
    state: RwLock<LoadMoreState>,
    load_seq: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct LoadMoreState {
    items: Vec<Entity>,
    pks: HashSet<Key>,
    next_page: usize,
    total: usize,
    loading: bool,
    exhausted: bool,
    query: Value,
    criteria: Criteria,
    order_by: Value,
    ordering: Ordering,
}

impl LoadMoreView {
    pub fn new(
        collection: Arc<Collection>,
        query: Value,
        order_by: Value,
        page_size: usize,
        mask: RelationMask,
    ) -> Result<Arc<Self>, CollectionError> {
        let criteria = Criteria::parse(&query)?;
        let ordering = Ordering::parse(&order_by)?;
        let view = Arc::new(LoadMoreView {
            collection,
            mask,
            page_size,
            state: RwLock::new(LoadMoreState {
                items: Vec::new(),
                pks: HashSet::new(),
                next_page: 0,
                total: 0,
                loading: false,
                exhausted: false,
                query,
                criteria,
                order_by,
                ordering,
            }),
            load_seq: AtomicU64::new(0),
            task: Mutex::new(None),
        });
        view.clone().attach();
        Ok(view)
    }

    fn attach(self: Arc<Self>) {
        let mut inserted_rx = self.collection.inserted();
        let mut removed_rx = self.collection.removed();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = inserted_rx.recv() => {
                        match event {
                            Ok(event) => this.on_inserted(event.entity, event.previous).await,
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

    pub fn dispose(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub async fn items(&self) -> Vec<Entity> {
        self.state.read().await.items.clone()
    }

    pub async fn total(&self) -> usize {
        self.state.read().await.total
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    /// Whether the last `load_more` reached the end of the full match set.
    pub async fn is_exhausted(&self) -> bool {
        self.state.read().await.exhausted
    }

    /// Reset accumulated state and load page 0 under the new predicate
    /// (spec.md §4.7, "`setQuery`/`setOrderBy` resets accumulated state then
    /// loads page 0").
    pub async fn set_query(self: &Arc<Self>, query: Value) -> Result<(), CollectionError> {
        let criteria = Criteria::parse(&query)?;
        {
            let mut state = self.state.write().await;
            state.query = query;
            state.criteria = criteria;
            reset(&mut state);
        }
        self.load_more().await
    }

    pub async fn set_order_by(self: &Arc<Self>, order_by: Value) -> Result<(), CollectionError> {
        let ordering = Ordering::parse(&order_by)?;
        {
            let mut state = self.state.write().await;
            state.order_by = order_by;
            state.ordering = ordering;
            reset(&mut state);
        }
        self.load_more().await
    }

    /// Fetch the next page and merge it into `items` (spec.md §4.7, "`loadMore`
    /// advances the page").
    pub async fn load_more(self: &Arc<Self>) -> Result<(), CollectionError> {
        let seq = self.load_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let (query, order_by, page) = {
            let mut state = self.state.write().await;
            state.loading = true;
            (state.query.clone(), state.order_by.clone(), state.next_page)
        };
        let params = FetchParams::new(query)
            .with_order_by(order_by)
            .with_offset(page * self.page_size)
            .with_limit(self.page_size);
        let slice = self
            .collection
            .fetch(params, FetchOptions {
                force_load: false,
                load_relations: Some(self.mask.clone()),
            })
            .await?;
        let total = slice.total.unwrap_or_else(|| slice.len());
        let fetched_len = slice.len();

        if self.load_seq.load(AtomicOrdering::SeqCst) != seq {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let ordering = state.ordering.clone();
        for entity in slice.into_vec() {
            state.pks.insert(entity.pk().clone());
            sorted_upsert(&mut state.items, entity, &ordering);
        }
        state.total = total;
        state.next_page = page + 1;
        state.exhausted = fetched_len < self.page_size || state.items.len() >= total;
        state.loading = false;
        Ok(())
    }

    async fn on_inserted(&self, entity: Entity, previous: Option<Entity>) {
        let mut state = self.state.write().await;
        if let Some(previous) = &previous {
            if state.pks.remove(previous.pk()) {
                remove_by_pk(&mut state.items, previous.pk());
                state.total = state.total.saturating_sub(1);
            }
        }
        if !state.criteria.matches(&entity.to_value()) {
            return;
        }
        let is_new = state.pks.insert(entity.pk().clone());
        let ordering = state.ordering.clone();
        sorted_upsert(&mut state.items, entity, &ordering);
        if is_new {
            state.total += 1;
        }
    }

    async fn on_removed(&self, entity: &Entity) {
        let mut state = self.state.write().await;
        if state.pks.remove(entity.pk()) {
            remove_by_pk(&mut state.items, entity.pk());
            state.total = state.total.saturating_sub(1);
        }
    }
}

fn reset(state: &mut LoadMoreState) {
    state.items.clear();
    state.pks.clear();
    state.next_page = 0;
    state.total = 0;
    state.exhausted = false;
}

impl Drop for LoadMoreView {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
