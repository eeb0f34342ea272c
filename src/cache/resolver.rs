//! Cache-aside resolution for detail and trending lookups.
//!
//! A lookup is served from the store while the entry is fresh. Otherwise the
//! upstream is asked, and the result is written back in the background. The
//! upstream call runs on its own task, so the write-back still happens when
//! the caller that started it goes away. When the upstream fails, an expired
//! entry is served instead if one is still stored; only when there is nothing
//! to fall back on does the caller see the upstream error.

use crate::cache::entry::{CacheKey, CacheTable, ListKind, SeasonNumber, TitleId};
use crate::cache::store::{get_within, spawn_write, SharedStore};
use crate::config::CacheConfig;
use crate::error::{TvCacheError, UpstreamError};
use crate::metrics::SharedMetrics;
use crate::services::tmdb::UpstreamClient;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type UpstreamResult = Result<Value, UpstreamError>;

/// Outcome of a spawned fetch. `Err` means the task itself died.
type FetchOutcome = Result<UpstreamResult, String>;
type InflightFetch = Shared<BoxFuture<'static, FetchOutcome>>;

pub struct CacheAside {
    store: SharedStore,
    upstream: Arc<dyn UpstreamClient>,
    metrics: SharedMetrics,
    config: CacheConfig,
    /// Upstream calls currently running, keyed by what they will populate.
    /// The id lets a finished fetch clear only its own slot.
    inflight: Arc<DashMap<CacheKey, (u64, InflightFetch)>>,
    next_fetch_id: AtomicU64,
}

impl CacheAside {
    pub fn new(
        store: SharedStore,
        upstream: Arc<dyn UpstreamClient>,
        metrics: SharedMetrics,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            metrics,
            config,
            inflight: Arc::new(DashMap::new()),
            next_fetch_id: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn upstream(&self) -> &Arc<dyn UpstreamClient> {
        &self.upstream
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl_for(&self, table: CacheTable) -> Duration {
        match table {
            CacheTable::TitleDetail => self.config.title_ttl,
            CacheTable::SeasonDetail => self.config.season_ttl,
            CacheTable::RankedList => self.config.list_ttl,
        }
    }

    pub async fn title_detail(&self, id: TitleId) -> Result<Value, TvCacheError> {
        let upstream = Arc::clone(&self.upstream);
        self.resolve(CacheKey::Title(id), move || {
            async move { upstream.title_detail(id).await }.boxed()
        })
        .await
    }

    pub async fn season_detail(
        &self,
        id: TitleId,
        season: SeasonNumber,
    ) -> Result<Value, TvCacheError> {
        let upstream = Arc::clone(&self.upstream);
        self.resolve(CacheKey::Season(id, season), move || {
            async move { upstream.season_detail(id, season).await }.boxed()
        })
        .await
    }

    pub async fn trending(&self, kind: ListKind) -> Result<Value, TvCacheError> {
        if kind.upstream_window().is_none() {
            return Err(TvCacheError::Validation(format!(
                "{} is not a trending window",
                kind.as_str()
            )));
        }

        let upstream = Arc::clone(&self.upstream);
        self.resolve(CacheKey::List(kind), move || {
            async move { upstream.trending(kind).await }.boxed()
        })
        .await
    }

    /// Resolve `key`, calling `fetch` only when the store has nothing fresh.
    pub async fn resolve<F>(&self, key: CacheKey, fetch: F) -> Result<Value, TvCacheError>
    where
        F: FnOnce() -> BoxFuture<'static, UpstreamResult>,
    {
        let table = key.table().as_str();

        if self.store.is_available() {
            match self.store.get(&key).await {
                Ok(Some(entry)) if entry.is_fresh(Utc::now()) => {
                    debug!(key = %key, expires_at = %entry.expires_at, "Cache HIT (fresh)");
                    self.metrics.record_lookup(table, "hit");
                    return Ok(entry.payload);
                }
                Ok(Some(entry)) => {
                    debug!(key = %key, expired_at = %entry.expires_at, "Cache HIT (stale), refreshing");
                    self.metrics.record_lookup(table, "stale");
                }
                Ok(None) => {
                    debug!(key = %key, "Cache MISS");
                    self.metrics.record_lookup(table, "miss");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                    self.metrics.record_lookup(table, "error");
                }
            }
        } else {
            debug!(key = %key, "Store unavailable, bypassing cache");
            self.metrics.record_lookup(table, "bypass");
        }

        let err = match self.fetch_upstream(key, fetch).await {
            Ok(Ok(payload)) => return Ok(payload),
            Ok(Err(err)) => TvCacheError::from(err),
            Err(task_err) => {
                TvCacheError::Internal(format!("upstream fetch for {} aborted: {}", key, task_err))
            }
        };

        match self.stale_fallback(&key).await {
            Some(payload) => Ok(payload),
            None => {
                warn!(key = %key, error = %err, "Upstream failed with no cached fallback");
                Err(err)
            }
        }
    }

    /// Run `fetch`, sharing it with concurrent callers for the same key when
    /// coalescing is on.
    async fn fetch_upstream<F>(&self, key: CacheKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> BoxFuture<'static, UpstreamResult>,
    {
        if !self.config.coalesce {
            info!(key = %key, "Fetching from upstream");
            return self.spawn_fetch(key, fetch(), None).await;
        }

        let (id, shared, joined) = match self.inflight.entry(key) {
            Entry::Occupied(slot) => {
                let (id, shared) = slot.get();
                (*id, shared.clone(), true)
            }
            Entry::Vacant(slot) => {
                let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let shared = self.spawn_fetch(key, fetch(), Some(id)).shared();
                slot.insert((id, shared.clone()));
                (id, shared, false)
            }
        };

        if joined {
            debug!(key = %key, "Joining in-flight upstream fetch");
            self.metrics.record_coalesced(key.table().as_str());
        } else {
            info!(key = %key, "Fetching from upstream");
        }

        let outcome = shared.await;
        if outcome.is_err() {
            // A task that died never cleared its own slot
            self.inflight.remove_if(&key, |_, (current, _)| *current == id);
        }
        outcome
    }

    /// Start `request` on its own task. On success the task schedules the
    /// write-back, and it clears the in-flight slot `fetch_id` when done,
    /// whether or not any caller is still waiting.
    fn spawn_fetch(
        &self,
        key: CacheKey,
        request: BoxFuture<'static, UpstreamResult>,
        fetch_id: Option<u64>,
    ) -> BoxFuture<'static, FetchOutcome> {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let inflight = Arc::clone(&self.inflight);
        let ttl = self.ttl_for(key.table());

        let task = tokio::spawn(async move {
            let result = timed(Arc::clone(&metrics), key.table().as_str(), request).await;
            if let Ok(payload) = &result {
                spawn_write(store, metrics, key, payload.clone(), ttl);
            }
            if let Some(id) = fetch_id {
                inflight.remove_if(&key, |_, (current, _)| *current == id);
            }
            result
        });

        async move { task.await.map_err(|e| e.to_string()) }.boxed()
    }

    /// Read `key` ignoring freshness, bounded by the fallback timeout.
    async fn stale_fallback(&self, key: &CacheKey) -> Option<Value> {
        let table = key.table().as_str();

        if !self.store.is_available() {
            self.metrics.record_fallback(table, "unavailable");
            return None;
        }

        match get_within(self.store.as_ref(), key, self.config.fallback_timeout).await {
            Ok(Some(entry)) => {
                info!(
                    key = %key,
                    fetched_at = %entry.fetched_at,
                    "Upstream failed, serving cached entry"
                );
                self.metrics.record_fallback(table, "served");
                Some(entry.payload)
            }
            Ok(None) => {
                self.metrics.record_fallback(table, "empty");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Fallback cache read failed");
                self.metrics.record_fallback(table, "error");
                None
            }
        }
    }
}

async fn timed(
    metrics: SharedMetrics,
    call: &'static str,
    fetch: BoxFuture<'static, UpstreamResult>,
) -> UpstreamResult {
    let start = Instant::now();
    let result = fetch.await;
    let status = if result.is_ok() { "success" } else { "error" };
    metrics.record_upstream(call, status, start.elapsed().as_secs_f64());
    result
}
