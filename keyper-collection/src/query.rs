use keyper_core::{Entity, SliceArray};
use keyper_datasource::FetchParams;
use keyper_query::{Criteria, Ordering, QueryError};
use serde_json::Value;

use crate::cache::{stringify_fk, CollectionState};
use crate::collection::Collection;
use crate::error::CollectionError;

impl Collection {
    /// Synchronous, cache-only query: parse `params.criteria`, pick the cheapest
    /// candidate set from the secondary indexes, filter, sort, and page
    /// (spec.md §4.3, "filter"). Never touches the Data Source — `fetch` is the
    /// cache-or-load counterpart.
    pub fn filter(&self, params: &FetchParams) -> Result<SliceArray<Entity>, CollectionError> {
        let criteria = Criteria::parse(&params.criteria)?;
        let candidates = {
            let state = self.read_state();
            smallest_candidate(&state, &params.criteria)
        };
        let mut matched: Vec<Entity> = candidates.into_iter().filter(|e| criteria.matches(&e.to_value())).collect();
        let total = matched.len();

        match &params.order_by {
            Some(order) => {
                let ordering = Ordering::parse(order)?;
                ordering.sort_by(&mut matched, Entity::to_value);
            }
            None if params.is_paged() => {
                return Err(CollectionError::Query(QueryError::PagingWithoutOrdering));
            }
            None => {}
        }

        let offset = params.offset.unwrap_or(0);
        let sliced = if offset >= matched.len() {
            Vec::new()
        } else {
            let end = params.limit.map(|limit| (offset + limit).min(matched.len())).unwrap_or(matched.len());
            matched[offset..end].to_vec()
        };
        Ok(SliceArray::with_total(sliced, total))
    }
}

/// Pick the smallest plausible candidate set for `raw_where` by exploiting any
/// bare-equality term on a field this collection maintains a secondary index for
/// (spec.md §4.3, "Candidate selection"). If such a field's bucket is absent, the
/// result is empty immediately — no need to even consult the full index.
fn smallest_candidate(state: &CollectionState, raw_where: &Value) -> Vec<Entity> {
    let mut best: Option<Vec<Entity>> = None;
    if let Value::Object(map) = raw_where {
        for (field, value) in map {
            if field.starts_with('$') || !state.indexes.contains_key(field) {
                continue;
            }
            let eq_value = match value {
                Value::Object(sub) if sub.len() == 1 => sub.get("$eq"),
                Value::Object(_) => None,
                scalar => Some(scalar),
            };
            let Some(eq_value) = eq_value else { continue };
            let bucket_key = stringify_fk(eq_value);
            let bucket = state.indexes.get(field).and_then(|idx| idx.bucket(&bucket_key));
            let items: Vec<Entity> = match bucket {
                Some(bucket) => bucket.iter().cloned().collect(),
                None => return Vec::new(),
            };
            if best.as_ref().map(|best: &Vec<Entity>| items.len() < best.len()).unwrap_or(true) {
                best = Some(items);
            }
        }
    }
    best.unwrap_or_else(|| state.index.iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use async_trait::async_trait;
    use keyper_core::{Key, KeyPart};
    use keyper_datasource::{DataSource, RawEntity, SourceError};
    use serde_json::json;
    use std::sync::Arc;

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
        Collection::new("widgets", CollectionConfig::new("id"), Arc::new(NoopSource))
    }

    #[test]
    fn filter_orders_and_pages() {
        let c = collection();
        for i in 1..=5 {
            c.insert(json!({"id": i, "grp": "a"}).as_object().unwrap().clone()).unwrap();
        }
        let params = FetchParams::new(json!({"grp": "a"}))
            .with_order_by(json!("id-"))
            .with_limit(2);
        let page = c.filter(&params).unwrap();
        assert_eq!(page.total, Some(5));
        let ids: Vec<i64> = page.iter().map(|e| e.field("id").unwrap().as_i64().unwrap()).collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[test]
    fn paging_without_ordering_is_an_error() {
        let c = collection();
        c.insert(json!({"id": 1}).as_object().unwrap().clone()).unwrap();
        let params = FetchParams::new(json!({})).with_limit(1);
        assert!(c.filter(&params).is_err());
    }

    #[test]
    fn absent_indexed_field_value_short_circuits_to_empty() {
        let c = Collection::new(
            "widgets",
            CollectionConfig::new("id").with_relation(
                "owner",
                crate::config::RelationConfig::to_one("users").with_back_ref("widgets"),
            ),
            Arc::new(NoopSource),
        );
        c.register_back_ref("widgets", crate::cache::BackRefInfo {
            source_collection: "widgets".into(),
            foreign_key_field: "owner_pk".into(),
        })
        .unwrap();
        c.insert(json!({"id": 1, "owner_pk": "u1"}).as_object().unwrap().clone()).unwrap();
        let params = FetchParams::new(json!({"owner_pk": "u2"}));
        assert!(c.filter(&params).unwrap().is_empty());
    }
}
