//! Process-local cache store.
//!
//! Used when no database is configured, and as the store in tests. Expired
//! entries stay readable until the sweeper removes them, so stale fallback
//! behaves the same way it does against the database.

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::cache::store::CacheStore;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Mark the store reachable or unreachable. While unreachable every
    /// operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop every entry that expired at or before `now`. Returns how many
    /// entries were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Periodically evict expired entries until `shutdown_rx` flips to true.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired(Utc::now()).await;
                        if removed > 0 {
                            let remaining = store.len().await;
                            debug!(
                                removed = removed,
                                remaining = remaining,
                                "Evicted expired cache entries"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Memory store sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        self.check_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        let entry = CacheEntry::new(*key, payload, ttl, Utc::now());
        self.entries.write().await.insert(*key, entry);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{ListKind, SeasonNumber, TitleId};
    use serde_json::json;

    #[tokio::test]
    async fn put_replaces_existing_entry() {
        let store = MemoryStore::new();
        let key = CacheKey::Title(TitleId(1399));

        store
            .put(&key, json!({"name": "first"}), Duration::from_secs(60))
            .await
            .unwrap();
        let first = store.get(&key).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .put(&key, json!({"name": "second"}), Duration::from_secs(3600))
            .await
            .unwrap();
        let second = store.get(&key).await.unwrap().unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(second.payload, json!({"name": "second"}));
        assert!(second.fetched_at > first.fetched_at);
        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn keys_in_different_tables_do_not_collide() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        store.put(&CacheKey::Title(TitleId(1)), json!("title"), ttl).await.unwrap();
        store
            .put(&CacheKey::Season(TitleId(1), SeasonNumber(1)), json!("season"), ttl)
            .await
            .unwrap();
        store.put(&CacheKey::List(ListKind::Daily), json!([]), ttl).await.unwrap();

        assert_eq!(store.len().await, 3);
        let season = store
            .get(&CacheKey::Season(TitleId(1), SeasonNumber(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(season.payload, json!("season"));
    }

    #[tokio::test]
    async fn expired_entries_remain_until_swept() {
        let store = MemoryStore::new();
        let stale = CacheKey::Title(TitleId(1));
        let fresh = CacheKey::Title(TitleId(2));

        store.put(&stale, json!({}), Duration::ZERO).await.unwrap();
        store.put(&fresh, json!({}), Duration::from_secs(3600)).await.unwrap();

        // Reads never evict
        let entry = store.get(&stale).await.unwrap().unwrap();
        assert!(!entry.is_fresh(Utc::now()));

        let removed = store.sweep_expired(Utc::now()).await;
        assert_eq!(removed, 1);
        assert!(store.get(&stale).await.unwrap().is_none());
        assert!(store.get(&fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(!store.is_available());
        assert!(matches!(
            store.get(&CacheKey::Title(TitleId(1))).await,
            Err(StoreError::Unavailable)
        ));
        assert!(store
            .put(&CacheKey::Title(TitleId(1)), json!({}), Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn sweeper_evicts_in_background() {
        let store = Arc::new(MemoryStore::new());
        store.put(&CacheKey::Title(TitleId(1)), json!({}), Duration::ZERO).await.unwrap();
        store
            .put(&CacheKey::Title(TitleId(2)), json!({}), Duration::from_secs(3600))
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = store.spawn_sweeper(Duration::from_millis(10), rx);

        for _ in 0..200 {
            if store.len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len().await, 1);
        assert!(store.get(&CacheKey::Title(TitleId(2))).await.unwrap().is_some());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = watch::channel(false);
        let handle = store.spawn_sweeper(Duration::from_millis(10), rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
