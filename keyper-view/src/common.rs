use keyper_core::{Entity, Key};
use keyper_query::Ordering;

/// Insert `entity` into `items` (kept sorted by `ordering`) at the position a
/// binary search over the comparator finds, replacing any existing entry with the
/// same pk in place rather than duplicating it (spec.md §4.7, "insert it at the
/// correct sorted position"; §8, "view `items` are always sorted by the current
/// comparator").
pub fn sorted_upsert(items: &mut Vec<Entity>, entity: Entity, ordering: &Ordering) {
    if let Some(existing) = items.iter().position(|e| e.pk() == entity.pk()) {
        items.remove(existing);
    }
    let pos = items
        .binary_search_by(|probe| ordering.compare(&probe.to_value(), &entity.to_value()))
        .unwrap_or_else(|insert_at| insert_at);
    items.insert(pos, entity);
}

/// Remove `pk` from `items`, returning whether anything was removed.
pub fn remove_by_pk(items: &mut Vec<Entity>, pk: &Key) -> bool {
    if let Some(pos) = items.iter().position(|e| e.pk() == pk) {
        items.remove(pos);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyper_core::{Entity, Key, KeyPart};
    use serde_json::json;

    fn entity(id: i64) -> Entity {
        let fields = json!({"id": id}).as_object().unwrap().clone();
        Entity::new(fields, Key::single(KeyPart::Number(id as f64)), "widgets")
    }

    #[test]
    fn sorted_upsert_keeps_ascending_order() {
        let ordering = Ordering::parse(&json!("id")).unwrap();
        let mut items = vec![entity(1), entity(3)];
        sorted_upsert(&mut items, entity(2), &ordering);
        let ids: Vec<i64> = items.iter().map(|e| e.field("id").unwrap().as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn sorted_upsert_replaces_existing_pk() {
        let ordering = Ordering::parse(&json!("id")).unwrap();
        let mut items = vec![entity(1), entity(2)];
        let replacement = {
            let fields = json!({"id": 2, "tag": "new"}).as_object().unwrap().clone();
            Entity::new(fields, Key::single(KeyPart::Number(2.0)), "widgets")
        };
        sorted_upsert(&mut items, replacement, &ordering);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].field("tag").unwrap(), "new");
    }

    #[test]
    fn remove_by_pk_drops_matching_entry() {
        let mut items = vec![entity(1), entity(2)];
        assert!(remove_by_pk(&mut items, &Key::single(KeyPart::Number(1.0))));
        assert_eq!(items.len(), 1);
        assert!(!remove_by_pk(&mut items, &Key::single(KeyPart::Number(1.0))));
    }
}
