//! Storage seam for cached payloads.

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::error::StoreError;
use crate::metrics::SharedMetrics;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// TTL-indexed key/value store with one logical table per entity type.
///
/// `get` returns whatever is stored, fresh or not. Judging freshness is the
/// caller's job, and an expired entry may linger until eviction gets to it.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether the backend is currently believed to be reachable.
    fn is_available(&self) -> bool;

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry for `key`, stamping `fetched_at = now` and
    /// `expires_at = now + ttl`.
    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

pub type SharedStore = Arc<dyn CacheStore>;

/// `get` bounded by `limit`; a slow store is reported as a timeout.
pub async fn get_within(
    store: &dyn CacheStore,
    key: &CacheKey,
    limit: Duration,
) -> Result<Option<CacheEntry>, StoreError> {
    match tokio::time::timeout(limit, store.get(key)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Write `payload` back to the store without making the caller wait.
///
/// The task owns its copy of the payload. Its outcome is only logged and
/// counted; nothing on the request path observes it.
pub fn spawn_write(
    store: SharedStore,
    metrics: SharedMetrics,
    key: CacheKey,
    payload: Value,
    ttl: Duration,
) -> Option<JoinHandle<()>> {
    let table = key.table().as_str();

    if !store.is_available() {
        debug!(key = %key, "Store unavailable, skipping cache write");
        metrics.record_store_write(table, "skipped");
        return None;
    }

    Some(tokio::spawn(async move {
        match store.put(&key, payload, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache entry stored");
                metrics.record_store_write(table, "success");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Async cache write failed");
                metrics.record_store_write(table, "error");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::TitleId;
    use crate::cache::memory::MemoryStore;
    use crate::metrics::create_metrics;
    use crate::testing::SlowStore;
    use serde_json::json;

    #[tokio::test]
    async fn spawned_write_lands_in_store() {
        let store = Arc::new(MemoryStore::new());
        let key = CacheKey::Title(TitleId(7));

        let handle = spawn_write(
            store.clone(),
            create_metrics(),
            key,
            json!({"id": 7}),
            Duration::from_secs(60),
        )
        .expect("store is available");
        handle.await.unwrap();

        let entry = store.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.payload, json!({"id": 7}));
    }

    #[tokio::test]
    async fn write_is_skipped_when_store_is_down() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);

        let handle = spawn_write(
            store.clone(),
            create_metrics(),
            CacheKey::Title(TitleId(7)),
            json!({}),
            Duration::from_secs(60),
        );
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn get_within_times_out_on_slow_store() {
        let store = SlowStore::new(MemoryStore::new(), Duration::from_secs(5));
        let started = std::time::Instant::now();

        let result = get_within(
            &store,
            &CacheKey::Title(TitleId(1)),
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
