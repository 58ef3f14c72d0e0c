//! Property tests for the `Ordering` comparator laws spec.md §8 calls out
//! explicitly: `comparator("f+") = -comparator("f-")`, and a compound comparator
//! is lexicographic over its component keys.

use keyper::{Criteria, Ordering};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn ascending_is_the_negation_of_descending(a in -1000i64..1000, b in -1000i64..1000) {
        let asc = Ordering::parse(&json!("a")).unwrap();
        let desc = Ordering::parse(&json!("a-")).unwrap();
        let x = json!({"a": a});
        let y = json!({"a": b});
        prop_assert_eq!(asc.compare(&x, &y), desc.compare(&x, &y).reverse());
    }

    #[test]
    fn compound_ordering_is_lexicographic(
        a1 in 0i64..3, b1 in 0i64..3,
        a2 in 0i64..3, b2 in 0i64..3,
    ) {
        let ordering = Ordering::parse(&json!(["a", "b"])).unwrap();
        let x = json!({"a": a1, "b": b1});
        let y = json!({"a": a2, "b": b2});

        let expected = if a1 != a2 {
            a1.cmp(&a2)
        } else {
            b1.cmp(&b2)
        };
        prop_assert_eq!(ordering.compare(&x, &y), expected);
    }

    #[test]
    fn ordering_is_a_strict_weak_order(a in -100i64..100, b in -100i64..100, c in -100i64..100) {
        let ordering = Ordering::parse(&json!("a")).unwrap();
        let x = json!({"a": a});
        let y = json!({"a": b});
        let z = json!({"a": c});

        // Antisymmetry: compare(x, y) and compare(y, x) are reverses of each other.
        prop_assert_eq!(ordering.compare(&x, &y), ordering.compare(&y, &x).reverse());

        // Transitivity of "less than" across three points.
        if ordering.compare(&x, &y) == std::cmp::Ordering::Less
            && ordering.compare(&y, &z) == std::cmp::Ordering::Less
        {
            prop_assert_eq!(ordering.compare(&x, &z), std::cmp::Ordering::Less);
        }
    }

    #[test]
    fn gte_is_exactly_gt_or_eq(a in -100i64..100, b in -100i64..100) {
        let doc = json!({"a": a});
        let gte = Criteria::parse(&json!({"a": {"$gte": b}})).unwrap().matches(&doc);
        let gt = Criteria::parse(&json!({"a": {"$gt": b}})).unwrap().matches(&doc);
        let eq = Criteria::parse(&json!({"a": {"$eq": b}})).unwrap().matches(&doc);
        prop_assert_eq!(gte, gt || eq);
    }

    #[test]
    fn not_is_the_negation_of_its_inner_criteria(a in -100i64..100, b in -100i64..100) {
        let doc = json!({"a": a});
        let inner = Criteria::parse(&json!({"a": b})).unwrap().matches(&doc);
        let negated = Criteria::parse(&json!({"$not": {"a": b}})).unwrap().matches(&doc);
        prop_assert_eq!(inner, !negated);
    }

    #[test]
    fn ne_is_the_negation_of_eq(a in -100i64..100, b in -100i64..100) {
        let doc = json!({"a": a});
        let eq = Criteria::parse(&json!({"a": {"$eq": b}})).unwrap().matches(&doc);
        let ne = Criteria::parse(&json!({"a": {"$ne": b}})).unwrap().matches(&doc);
        prop_assert_eq!(eq, !ne);
    }
}
