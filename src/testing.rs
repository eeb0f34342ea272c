//! In-process doubles for the upstream API and the cache store.

use crate::cache::entry::{CacheEntry, CacheKey, ListKind, SeasonNumber, TitleId};
use crate::cache::memory::MemoryStore;
use crate::cache::store::CacheStore;
use crate::error::{StoreError, UpstreamError};
use crate::services::tmdb::UpstreamClient;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scriptable upstream that counts every call it receives.
#[derive(Default)]
pub struct FakeUpstream {
    titles: Mutex<HashMap<u64, Value>>,
    seasons: Mutex<HashMap<(u64, u32), Value>>,
    trending: Mutex<HashMap<&'static str, Value>>,
    candidates: Mutex<Vec<Value>>,
    failure: Mutex<Option<UpstreamError>>,
    listing_failure: Mutex<Option<UpstreamError>>,
    failing_titles: Mutex<HashSet<u64>>,
    delay: Mutex<Duration>,
    title_calls: AtomicUsize,
    season_calls: AtomicUsize,
    trending_calls: AtomicUsize,
    listing_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_title(&self, id: u64, payload: Value) {
        self.titles.lock().unwrap().insert(id, payload);
    }

    pub fn insert_season(&self, id: u64, season: u32, payload: Value) {
        self.seasons.lock().unwrap().insert((id, season), payload);
    }

    pub fn insert_trending(&self, kind: ListKind, payload: Value) {
        self.trending.lock().unwrap().insert(kind.as_str(), payload);
    }

    pub fn set_candidates(&self, candidates: Vec<Value>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    /// Make every call fail with `failure`, or clear it with `None`.
    pub fn fail_all(&self, failure: Option<UpstreamError>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Make only the currently-airing listing fail.
    pub fn fail_listing(&self, failure: Option<UpstreamError>) {
        *self.listing_failure.lock().unwrap() = failure;
    }

    pub fn fail_title(&self, id: u64) {
        self.failing_titles.lock().unwrap().insert(id);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn title_calls(&self) -> usize {
        self.title_calls.load(Ordering::SeqCst)
    }

    pub fn season_calls(&self) -> usize {
        self.season_calls.load(Ordering::SeqCst)
    }

    pub fn trending_calls(&self) -> usize {
        self.trending_calls.load(Ordering::SeqCst)
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.title_calls() + self.season_calls() + self.trending_calls() + self.listing_calls()
    }

    async fn respond(&self) -> Result<(), UpstreamError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn not_found() -> UpstreamError {
    UpstreamError::status(404, "The resource you requested could not be found.")
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn title_detail(&self, id: TitleId) -> Result<Value, UpstreamError> {
        self.title_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        if self.failing_titles.lock().unwrap().contains(&id.0) {
            return Err(UpstreamError::status(500, "title lookup failed"));
        }
        self.titles.lock().unwrap().get(&id.0).cloned().ok_or_else(not_found)
    }

    async fn season_detail(&self, id: TitleId, season: SeasonNumber) -> Result<Value, UpstreamError> {
        self.season_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        self.seasons
            .lock()
            .unwrap()
            .get(&(id.0, season.0))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn trending(&self, kind: ListKind) -> Result<Value, UpstreamError> {
        self.trending_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        self.trending
            .lock()
            .unwrap()
            .get(kind.as_str())
            .cloned()
            .ok_or_else(not_found)
    }

    async fn on_the_air(&self) -> Result<Vec<Value>, UpstreamError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        if let Some(err) = self.listing_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.candidates.lock().unwrap().clone())
    }
}

/// Memory store whose reads take at least `delay`, after an optional number
/// of immediate reads.
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
    fast_reads: AtomicUsize,
}

impl SlowStore {
    pub fn new(inner: MemoryStore, delay: Duration) -> Self {
        Self::with_fast_reads(inner, delay, 0)
    }

    pub fn with_fast_reads(inner: MemoryStore, delay: Duration, fast_reads: usize) -> Self {
        Self {
            inner,
            delay,
            fast_reads: AtomicUsize::new(fast_reads),
        }
    }
}

#[async_trait]
impl CacheStore for SlowStore {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let fast = self
            .fast_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !fast {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), StoreError> {
        self.inner.put(key, payload, ttl).await
    }

    fn backend(&self) -> &'static str {
        "slow-memory"
    }
}

/// Store that reports itself reachable but fails every read. Writes land in
/// the wrapped memory store.
pub struct FailingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Encoding("corrupt document".to_string()))
    }

    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), StoreError> {
        self.inner.put(key, payload, ttl).await
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

/// Poll until a background write for `key` lands, panicking after two seconds.
pub async fn wait_for_entry(store: &dyn CacheStore, key: &CacheKey) -> CacheEntry {
    for _ in 0..200 {
        if let Ok(Some(entry)) = store.get(key).await {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no cache entry for {} after waiting", key);
}
