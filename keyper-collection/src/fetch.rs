use std::sync::Arc;

use keyper_core::{stable_key, Entity, Key, SliceArray};
use keyper_datasource::FetchParams;
use keyper_query::{Criteria, Ordering};
use serde_json::Value;

use crate::cache::CachedQuery;
use crate::collection::Collection;
use crate::error::CollectionError;
use crate::mutable::MutableEntity;
use crate::options::{FetchAllOptions, FetchOneOptions, FetchOptions};

impl Collection {
    /// Cache-or-load by primary key (spec.md §4.5, "fetch_one"). A cache hit
    /// (unless `force_load`) resolves immediately; a miss joins whatever request
    /// is already in flight for this pk, or starts one.
    pub async fn fetch_one(self: &Arc<Self>, pk: Key, opts: FetchOneOptions) -> Result<Entity, CollectionError> {
        if !opts.force_load {
            if let Some(cached) = self.peek(&pk) {
                tracing::debug!(collection = %self.name(), pk = %pk.fingerprint(), "fetch_one: cache hit");
                return self.hydrate_one(cached, opts.load_relations).await;
            }
        }
        tracing::debug!(collection = %self.name(), pk = %pk.fingerprint(), "fetch_one: cache miss");
        let key = pk.fingerprint();
        let this = self.clone();
        let pk_for_work = pk.clone();
        self.pending_items
            .dedup(key, async move {
                let raw = this.source.find_one(&pk_for_work, &Value::Null).await?;
                this.insert(raw)?;
                Ok(())
            })
            .await?;
        // Re-read from the cache rather than trust the work closure's own return
        // value: a concurrent mutation could have landed between the closure
        // settling and this caller resuming (spec.md §4.5, "re-fetch the cached
        // snapshot after it completes").
        let entity = self.peek(&pk).ok_or_else(|| CollectionError::NotCached(pk.fingerprint()))?;
        self.hydrate_one(entity, opts.load_relations).await
    }

    /// Cache-or-load by predicate (spec.md §4.5, "fetch"). Non-paged queries are
    /// cacheable by their stringified `where` (ignoring `orderBy`); paged queries
    /// (`limit`/`offset` set) are deduplicated in flight but never cached, since a
    /// cached full-match set can't answer "page 3" on its own.
    pub async fn fetch(self: &Arc<Self>, params: FetchParams, opts: FetchOptions) -> Result<SliceArray<Entity>, CollectionError> {
        let cache_key = if params.is_paged() {
            None
        } else {
            Some(stable_key(&params.to_cache_value()))
        };

        if !opts.force_load {
            if let Some(cache_key) = &cache_key {
                if let Some(slice) = self.read_cached_query(cache_key, &params)? {
                    tracing::debug!(collection = %self.name(), cache_key = %cache_key, "fetch: query cache hit");
                    return self.hydrate_slice(slice, opts.load_relations).await;
                }
            }
        }
        tracing::debug!(collection = %self.name(), paged = params.is_paged(), "fetch: query cache miss");

        let criteria = Criteria::parse(&params.criteria)?;
        let pending_key = stable_key(&params.to_value());
        let this = self.clone();
        let params_for_work = params.clone();
        let cache_key_for_work = cache_key.clone();
        let slice = self
            .pending_queries
            .dedup(pending_key, async move {
                let raw = this.source.find(&params_for_work, &Value::Null).await?;
                let total = raw.total;
                let mut entities = Vec::with_capacity(raw.len());
                for raw_entity in raw.into_vec() {
                    entities.push(this.insert(raw_entity)?);
                }
                let total = total.unwrap_or(entities.len());
                if let Some(cache_key) = cache_key_for_work {
                    this.promote_query_cache(cache_key, &params_for_work, criteria, entities.clone());
                }
                Ok(SliceArray::with_total(entities, total))
            })
            .await?;
        self.hydrate_slice(slice, opts.load_relations).await
    }

    /// Batch cache-or-load by primary key (spec.md §4.5, "fetch_all"). Already-
    /// cached pks resolve immediately; pks another caller is already loading join
    /// that request; the rest are loaded in a single `find_all` call shared under
    /// every pk it covers, so a concurrent `fetch_one`/`fetch_all` for one of them
    /// joins the same batch instead of starting its own.
    pub async fn fetch_all(self: &Arc<Self>, pks: &[Key], opts: FetchAllOptions) -> Result<Vec<Option<Entity>>, CollectionError> {
        let mut to_load: Vec<Key> = Vec::new();
        let mut joins = Vec::new();
        for pk in pks {
            if !opts.force_load && self.peek(pk).is_some() {
                continue;
            }
            let key = pk.fingerprint();
            if let Some(shared) = self.pending_items.existing(&key) {
                joins.push(shared);
            } else if !to_load.contains(pk) {
                to_load.push(pk.clone());
            }
        }

        tracing::debug!(
            collection = %self.name(),
            requested = pks.len(),
            joined = joins.len(),
            to_load = to_load.len(),
            "fetch_all: cache/coalescing split"
        );

        if !to_load.is_empty() {
            let this = self.clone();
            let batch = to_load.clone();
            let keys: Vec<String> = batch.iter().map(Key::fingerprint).collect();
            let work = async move {
                let raws = this.source.find_all(&batch, &Value::Null).await?;
                for raw in raws {
                    this.insert(raw)?;
                }
                Ok(())
            };
            joins.push(self.pending_items.spawn_group(keys, work));
        }

        for join in joins {
            join.await?;
        }

        let results: Vec<Option<Entity>> = pks.iter().map(|pk| self.peek(pk)).collect();
        let mask = self.merge_mask(opts.load_relations);
        if !mask.is_empty() {
            let present: Vec<Entity> = results.iter().filter_map(Clone::clone).collect();
            if !present.is_empty() {
                self.load_relations(&present, &mask).await?;
            }
        }
        Ok(results)
    }

    async fn hydrate_one(self: &Arc<Self>, entity: Entity, mask: Option<crate::config::RelationMask>) -> Result<Entity, CollectionError> {
        let merged = self.merge_mask(mask);
        if !merged.is_empty() {
            self.load_relations(std::slice::from_ref(&entity), &merged).await?;
        }
        Ok(entity)
    }

    async fn hydrate_slice(
        self: &Arc<Self>,
        slice: SliceArray<Entity>,
        mask: Option<crate::config::RelationMask>,
    ) -> Result<SliceArray<Entity>, CollectionError> {
        let merged = self.merge_mask(mask);
        if !merged.is_empty() {
            let items: Vec<Entity> = slice.iter().cloned().collect();
            self.load_relations(&items, &merged).await?;
        }
        Ok(slice)
    }

    fn read_cached_query(&self, cache_key: &str, params: &FetchParams) -> Result<Option<SliceArray<Entity>>, CollectionError> {
        let mut items: Vec<Entity> = {
            let state = self.read_state();
            match state.queries.get(cache_key) {
                Some(cached) => cached.items.iter().cloned().collect(),
                None => return Ok(None),
            }
        };
        if let Some(order) = &params.order_by {
            let ordering = Ordering::parse(order)?;
            ordering.sort_by(&mut items, Entity::to_value);
        }
        let total = items.len();
        Ok(Some(SliceArray::with_total(items, total)))
    }

    fn promote_query_cache(&self, cache_key: String, params: &FetchParams, criteria: Criteria, entities: Vec<Entity>) {
        let mut state = self.write_state();
        state.queries.insert(
            cache_key,
            CachedQuery {
                where_raw: params.criteria.clone(),
                where_criteria: criteria,
                items: keyper_index::UniqueIndex::from_items_frozen(entities),
            },
        );
    }

    /// Send `payload` to the Data Source's `create` and cache the authoritative
    /// response (spec.md §4.5, "create").
    #[tracing::instrument(skip(self, payload), fields(collection = %self.name()))]
    pub async fn create(self: &Arc<Self>, payload: keyper_datasource::RawEntity) -> Result<Entity, CollectionError> {
        let to_send = self.apply_before_send(payload);
        let raw = self.source.create(&to_send, &Value::Null).await?;
        self.insert(raw)
    }

    /// Send `payload` as the full entity to `update` and cache the response
    /// (spec.md §4.5, "update"). Use [`Collection::update_diff`] to send only a
    /// computed diff.
    #[tracing::instrument(skip(self, payload), fields(collection = %self.name(), pk = %pk.fingerprint()))]
    pub async fn update(self: &Arc<Self>, pk: Key, payload: keyper_datasource::RawEntity) -> Result<Entity, CollectionError> {
        let to_send = self.apply_before_send(payload);
        let raw = self.source.update(&pk, &to_send, &Value::Null).await?;
        self.insert(raw)
    }

    /// Diff-based update over a [`MutableEntity`] (spec.md §4.5, "update ...
    /// sends either full payload or the computed diff"). An empty diff is a
    /// no-op that resolves to the currently cached entity without a round trip.
    /// When `inplace` is set, `mutable` is replaced with a fresh mutable clone of
    /// the post-update entity, built with the same relation mask it was created
    /// with.
    pub async fn update_diff(self: &Arc<Self>, mutable: &mut MutableEntity, inplace: bool) -> Result<Entity, CollectionError> {
        let diff = match self.get_diff(mutable)? {
            Some(diff) => diff,
            None => {
                return self
                    .peek(mutable.pk())
                    .ok_or_else(|| CollectionError::ForeignMutable(mutable.pk().fingerprint()))
            }
        };
        let to_send = self.apply_before_send(diff);
        let raw = self.source.update(mutable.pk(), &to_send, &Value::Null).await?;
        let entity = self.insert(raw)?;
        if inplace {
            let mask = mutable.relations_mask().clone();
            *mutable = self.build_mutable(&entity, Some(&mask))?;
        }
        Ok(entity)
    }

    /// Delete by primary key; if the entity was cached, it is removed and a
    /// `removed` event fires (spec.md §4.5, "delete").
    #[tracing::instrument(skip(self), fields(collection = %self.name(), pk = %pk.fingerprint()))]
    pub async fn delete(self: &Arc<Self>, pk: Key) -> Result<(), CollectionError> {
        self.source.delete(&pk, &Value::Null).await?;
        if let Some(entity) = self.peek(&pk) {
            self.remove(&entity, true);
        }
        Ok(())
    }

    /// Route to `create` if `payload` carries no primary key, otherwise to
    /// `update` with the full payload (spec.md §4.5, "commit").
    pub async fn commit(self: &Arc<Self>, payload: keyper_datasource::RawEntity) -> Result<Entity, CollectionError> {
        match self.config().primary_key.extract(&payload) {
            Ok(pk) => self.update(pk, payload).await,
            Err(_) => self.create(payload).await,
        }
    }

    fn apply_before_send(&self, payload: keyper_datasource::RawEntity) -> keyper_datasource::RawEntity {
        match &self.config().before_send {
            Some(transform) => transform(payload),
            None => payload,
        }
    }
}
