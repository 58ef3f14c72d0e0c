use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::sync::Arc;

use keyper_collection::{Collection, CollectionError, FetchOptions, RelationMask};
use keyper_core::{Entity, Key};
use keyper_datasource::FetchParams;
use keyper_query::{Criteria, Ordering};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::common::{remove_by_pk, sorted_upsert};

/// A single page of a [`Collection`] query, kept live: `current_page` of
/// `page_size` items matching `query`, ordered by `order_by`, with `total`
/// tracking the full match count (spec.md §4.7, "PaginatedView").
pub struct PaginatedView {
    collection: Arc<Collection>,
    mask: RelationMask,
    page_size: usize,
    state: RwLock<PageState>,
    load_seq: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct PageState {
    items: Vec<Entity>,
    pks: HashSet<Key>,
    current_page: usize,
    total: usize,
    loading: bool,
    query: Value,
    criteria: Criteria,
    order_by: Value,
    ordering: Ordering,
}

impl PaginatedView {
    pub fn new(
        collection: Arc<Collection>,
        query: Value,
        order_by: Value,
        page_size: usize,
        mask: RelationMask,
    ) -> Result<Arc<Self>, CollectionError> {
        let criteria = Criteria::parse(&query)?;
        let ordering = Ordering::parse(&order_by)?;
        let view = Arc::new(PaginatedView {
            collection,
            mask,
            page_size,
            state: RwLock::new(PageState {
                items: Vec::new(),
                pks: HashSet::new(),
                current_page: 0,
                total: 0,
                loading: false,
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

    pub async fn current_page(&self) -> usize {
        self.state.read().await.current_page
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    /// Jump to `page` and reload from the Data Source (spec.md §4.7, "setPage").
    pub async fn set_page(self: &Arc<Self>, page: usize) -> Result<(), CollectionError> {
        {
            let mut state = self.state.write().await;
            state.current_page = page;
        }
        self.load().await
    }

    fn filter_params(query: Value, order_by: Value, page: usize, page_size: usize) -> FetchParams {
        FetchParams::new(query)
            .with_order_by(order_by)
            .with_offset(page * page_size)
            .with_limit(page_size)
    }

    pub async fn load(self: &Arc<Self>) -> Result<(), CollectionError> {
        let seq = self.load_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        {
            let mut state = self.state.write().await;
            state.loading = true;
        }
        let (query, order_by, page) = {
            let state = self.state.read().await;
            (state.query.clone(), state.order_by.clone(), state.current_page)
        };
        let params = Self::filter_params(query, order_by, page, self.page_size);
        let slice = self
            .collection
            .fetch(params, FetchOptions {
                force_load: false,
                load_relations: Some(self.mask.clone()),
            })
            .await?;
        let total = slice.total.unwrap_or_else(|| slice.len());

        if self.load_seq.load(AtomicOrdering::SeqCst) != seq {
            return Ok(());
        }
        let items = slice.into_vec();
        let mut state = self.state.write().await;
        state.pks = items.iter().map(|e| e.pk().clone()).collect();
        state.items = items;
        state.total = total;
        state.loading = false;
        Ok(())
    }

    async fn on_inserted(&self, entity: Entity, previous: Option<Entity>) {
        let mut state = self.state.write().await;
        if let Some(previous) = &previous {
            if state.pks.remove(previous.pk()) {
                remove_by_pk(&mut state.items, previous.pk());
            }
        }
        if !state.criteria.matches(&entity.to_value()) {
            return;
        }

        let is_first_page = state.current_page == 0;
        let on_last_page = (state.current_page + 1) * self.page_size >= state.total.max(state.items.len());

        if let (Some(first), Some(last)) = (state.items.first(), state.items.last()) {
            let vs_last = state.ordering.compare(&entity.to_value(), &last.to_value());
            let vs_first = state.ordering.compare(&entity.to_value(), &first.to_value());
            if vs_last == std::cmp::Ordering::Greater && !on_last_page {
                // Belongs on a later page we haven't loaded; don't show it here,
                // but it is part of the full match set (spec.md §4.7, "skip").
                state.total += 1;
                return;
            }
            if vs_first == std::cmp::Ordering::Less && !is_first_page {
                state.total += 1;
                return;
            }
        }

        state.pks.insert(entity.pk().clone());
        let ordering = state.ordering.clone();
        sorted_upsert(&mut state.items, entity, &ordering);
        state.total += 1;
        if state.items.len() > self.page_size {
            if let Some(overflow) = state.items.pop() {
                state.pks.remove(overflow.pk());
            }
        }
    }

    async fn on_removed(&self, entity: &Entity) {
        let mut state = self.state.write().await;
        if state.criteria.matches(&entity.to_value()) {
            state.total = state.total.saturating_sub(1);
        }
        if state.pks.remove(entity.pk()) {
            remove_by_pk(&mut state.items, entity.pk());
        }
    }
}

impl Drop for PaginatedView {
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
    async fn load_pages_by_offset_and_limit() {
        let c = collection();
        for i in 1..=25 {
            c.insert(json!({"id": i}).as_object().unwrap().clone()).unwrap();
        }
        let view = PaginatedView::new(c, json!({}), json!("id"), 10, RelationMask::new()).unwrap();
        view.load().await.unwrap();
        assert_eq!(view.items().await.len(), 10);
        assert_eq!(view.total().await, 25);

        view.set_page(2).await.unwrap();
        assert_eq!(view.items().await.len(), 5);
        assert_eq!(view.current_page().await, 2);
    }

    #[tokio::test]
    async fn removed_matching_item_decrements_total() {
        let c = collection();
        let e = c.insert(json!({"id": 1}).as_object().unwrap().clone()).unwrap();
        let view = PaginatedView::new(c.clone(), json!({}), json!("id"), 10, RelationMask::new()).unwrap();
        view.load().await.unwrap();
        assert_eq!(view.total().await, 1);
        c.remove(&e, true);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(view.total().await, 0);
    }
}
