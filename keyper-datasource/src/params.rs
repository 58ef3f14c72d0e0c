use serde_json::Value;

/// The external query wire form a `Collection` sends to its Data Source:
/// `{where?, orderBy?, limit?, offset?}` (spec.md §6, "Query wire form").
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchParams {
    pub criteria: Value,
    pub order_by: Option<Value>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FetchParams {
    pub fn new(criteria: Value) -> Self {
        FetchParams {
            criteria,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn with_order_by(mut self, order_by: Value) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// JSON projection used to compute stable fingerprints for the query cache and
    /// the pending-request map (spec.md §4.5).
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("where".to_string(), self.criteria.clone());
        if let Some(order_by) = &self.order_by {
            map.insert("orderBy".to_string(), order_by.clone());
        }
        if let Some(limit) = self.limit {
            map.insert("limit".to_string(), Value::from(limit));
        }
        if let Some(offset) = self.offset {
            map.insert("offset".to_string(), Value::from(offset));
        }
        Value::Object(map)
    }

    /// Projection used for the **cache key**: everything except `orderBy`
    /// (spec.md §4.5, "stable-stringify of `params` minus `orderBy`"). Only
    /// meaningful when neither `limit` nor `offset` is set — callers check that.
    pub fn to_cache_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("where".to_string(), self.criteria.clone());
        if let Some(limit) = self.limit {
            map.insert("limit".to_string(), Value::from(limit));
        }
        if let Some(offset) = self.offset {
            map.insert("offset".to_string(), Value::from(offset));
        }
        Value::Object(map)
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_value_excludes_order_by() {
        let params = FetchParams::new(json!({"a": 1})).with_order_by(json!("a"));
        assert_eq!(params.to_cache_value(), json!({"where": {"a": 1}}));
    }

    #[test]
    fn paged_params_are_detected() {
        assert!(!FetchParams::new(json!({})).is_paged());
        assert!(FetchParams::new(json!({})).with_limit(10).is_paged());
        assert!(FetchParams::new(json!({})).with_offset(5).is_paged());
    }
}
