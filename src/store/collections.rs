//! Memoized per-type collection handles.
//!
//! Each event type maps to its own collection. Opening one may involve I/O,
//! so the handle is created lazily on first use and shared afterwards.
//! Concurrent first uses of the same type wait on a single initialization.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Lazily-initialized, shared handles keyed by type name.
pub struct TypeCollections<C> {
    cells: DashMap<String, Arc<OnceCell<Arc<C>>>>,
}

impl<C> TypeCollections<C> {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Return the handle for `key`, running `init` only if no handle exists
    /// and no other task is already creating one.
    ///
    /// A failed `init` leaves the key uninitialized so a later call can retry.
    pub async fn get_or_try_init<E, F, Fut>(&self, key: &str, init: F) -> Result<Arc<C>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        // Clone the cell out so the map shard is not locked across the await.
        let cell = self
            .cells
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let handle = cell
            .get_or_try_init(|| async move { init().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Handle for `key` if it has already been initialized.
    pub fn get(&self, key: &str) -> Option<Arc<C>> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys, counting handles still being created.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Names of all initialized types, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .cells
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl<C> Default for TypeCollections<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_init_runs_once() {
        let collections = Arc::new(TypeCollections::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let collections = collections.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                collections
                    .get_or_try_init("requests", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>("requests_events".to_string())
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().as_str(), "requests_events");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(collections.keys(), vec!["requests".to_string()]);
    }

    #[tokio::test]
    async fn failed_init_can_be_retried() {
        let collections = TypeCollections::<u32>::new();
        let first = collections
            .get_or_try_init("clicks", || async { Err::<u32, _>("offline") })
            .await;
        assert!(first.is_err());
        assert!(collections.get("clicks").is_none());

        let second = collections
            .get_or_try_init("clicks", || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(*second, 7);
    }
}
