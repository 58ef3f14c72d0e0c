use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

/// Per-key in-flight-request deduplication (spec.md §4.5, §5: "at most one in-flight
/// request exists per pk and per stringified fetch params").
///
/// Built on `futures::future::Shared` rather than a channel or a background task:
/// concurrent callers simply `.await` clones of the same boxed future, and whichever
/// task happens to poll it first drives it to completion — the others are woken when
/// it resolves. This is the idiomatic Rust shape for "chain onto the pending
/// request" with no JS-style promise object to share.
pub struct PendingMap<T: Clone + Send + 'static, E: Clone + Send + 'static> {
    inflight: Mutex<HashMap<String, Shared<BoxFuture<'static, Result<T, E>>>>>,
}

impl<T: Clone + Send + 'static, E: Clone + Send + 'static> Default for PendingMap<T, E> {
    fn default() -> Self {
        PendingMap {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static, E: Clone + Send + 'static> PendingMap<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inflight.lock().unwrap().contains_key(key)
    }

    /// The in-flight future registered for `key`, if any, without starting new work.
    /// Used by `fetch_all` to join a pk that a concurrent `fetch_one`/`fetch_all`
    /// already started loading.
    pub fn existing(&self, key: &str) -> Option<Shared<BoxFuture<'static, Result<T, E>>>> {
        self.inflight.lock().unwrap().get(key).cloned()
    }

    /// Register `work` under every key in `keys` (a batch load covers several pks
    /// at once) and return the shared handle without awaiting it — the caller
    /// decides when to drive it, e.g. alongside other joined futures via
    /// `futures::future::join_all`. Every registered key is removed once `work`
    /// settles, regardless of outcome (spec.md §7, "cleared on settle").
    pub fn spawn_group(
        self: &Arc<Self>,
        keys: Vec<String>,
        work: impl Future<Output = Result<T, E>> + Send + 'static,
    ) -> Shared<BoxFuture<'static, Result<T, E>>> {
        let this = self.clone();
        let cleanup_keys = keys.clone();
        let fut: BoxFuture<'static, Result<T, E>> = async move {
            let result = work.await;
            let mut guard = this.inflight.lock().unwrap();
            for key in &cleanup_keys {
                guard.remove(key);
            }
            result
        }
        .boxed();
        let shared = fut.shared();
        {
            let mut guard = self.inflight.lock().unwrap();
            for key in &keys {
                guard.insert(key.clone(), shared.clone());
            }
        }
        tracing::debug!(keys = ?keys, "coalescing: started new in-flight request");
        shared
    }

    /// Run `work` deduplicated by `key`: a concurrent caller with the same key joins
    /// the same future instead of starting a new one.
    pub async fn dedup(
        self: &Arc<Self>,
        key: String,
        work: impl Future<Output = Result<T, E>> + Send + 'static,
    ) -> Result<T, E> {
        if let Some(shared) = self.existing(&key) {
            tracing::debug!(key = %key, "coalescing: joining in-flight request");
            return shared.await;
        }
        self.spawn_group(vec![key], work).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_with_same_key_share_one_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pending: Arc<PendingMap<i32, String>> = Arc::new(PendingMap::new());

        let make = |pending: Arc<PendingMap<i32, String>>, calls: Arc<AtomicUsize>| {
            pending.dedup("k".to_string(), async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok::<i32, String>(42)
            })
        };

        let a = make(pending.clone(), calls.clone());
        let b = make(pending.clone(), calls.clone());
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), 42);
        assert_eq!(rb.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_is_cleared_after_settle() {
        let pending: Arc<PendingMap<i32, String>> = Arc::new(PendingMap::new());
        pending.dedup("k".to_string(), async { Ok::<i32, String>(1) }).await.unwrap();
        assert!(!pending.is_pending("k"));
    }

    #[tokio::test]
    async fn spawn_group_registers_under_every_key_and_clears_all_on_settle() {
        let pending: Arc<PendingMap<i32, String>> = Arc::new(PendingMap::new());
        let shared = pending.spawn_group(vec!["a".into(), "b".into()], async { Ok::<i32, String>(7) });
        assert!(pending.is_pending("a"));
        assert!(pending.is_pending("b"));
        assert_eq!(shared.await.unwrap(), 7);
        assert!(!pending.is_pending("a"));
        assert!(!pending.is_pending("b"));
    }
}
