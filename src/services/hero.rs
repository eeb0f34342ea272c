//! Curated "new episodes" list.
//!
//! Candidates come from the live currently-airing listing, ranked by
//! popularity. The top few are resolved to full detail through the regular
//! title cache, kept only if their latest episode aired recently, and capped.
//! The result is cached under the hero list key so it can stand in when the
//! listing call fails.

use crate::cache::entry::{CacheKey, ListKind, TitleId};
use crate::cache::resolver::CacheAside;
use crate::cache::store::{get_within, spawn_write};
use crate::config::HeroConfig;
use crate::error::{TvCacheError, UpstreamError};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use futures::{future, stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct HeroCurator {
    resolver: Arc<CacheAside>,
    config: HeroConfig,
}

impl HeroCurator {
    pub fn new(resolver: Arc<CacheAside>, config: HeroConfig) -> Self {
        Self { resolver, config }
    }

    pub async fn new_episodes(&self) -> Result<Value, TvCacheError> {
        self.new_episodes_at(Utc::now()).await
    }

    async fn new_episodes_at(&self, now: DateTime<Utc>) -> Result<Value, TvCacheError> {
        let metrics = self.resolver.metrics();
        let start = Instant::now();

        let listing = self.resolver.upstream().on_the_air().await;
        let elapsed = start.elapsed().as_secs_f64();

        let candidates = match listing {
            Ok(candidates) => {
                metrics.record_upstream("on_the_air", "success", elapsed);
                candidates
            }
            Err(err) => {
                metrics.record_upstream("on_the_air", "error", elapsed);
                return self.fallback(err).await;
            }
        };

        let total = candidates.len();
        let ranked = rank_by_popularity(candidates);

        let details: Vec<Value> = stream::iter(ranked.into_iter().take(self.config.candidates))
            .map(|candidate| self.refine(candidate))
            .buffered(self.config.refine_concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await;

        let refined = details.len();
        let window = AirWindow::around(now, &self.config);
        let curated: Vec<Value> = details
            .into_iter()
            .filter(|detail| window.contains(detail))
            .take(self.config.limit)
            .collect();

        info!(
            candidates = total,
            refined = refined,
            kept = curated.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Hero list curated"
        );
        metrics.record_hero_run("success", Some(curated.len()));

        let payload = Value::Array(curated);
        spawn_write(
            Arc::clone(self.resolver.store()),
            Arc::clone(metrics),
            CacheKey::List(ListKind::Hero),
            payload.clone(),
            self.resolver.config().list_ttl,
        );

        Ok(payload)
    }

    /// Full detail for one candidate, or `None` if it has to be dropped.
    async fn refine(&self, candidate: Value) -> Option<Value> {
        let Some(id) = candidate.get("id").and_then(Value::as_u64) else {
            debug!("Dropping hero candidate without an id");
            return None;
        };

        match self.resolver.title_detail(TitleId(id)).await {
            Ok(detail) => Some(detail),
            Err(e) => {
                let name = candidate.get("name").and_then(Value::as_str).unwrap_or("?");
                warn!(tmdb_id = id, name = name, error = %e, "Failed to verify hero candidate");
                None
            }
        }
    }

    /// Last curated list, read with a hard time bound and no freshness check.
    async fn fallback(&self, err: UpstreamError) -> Result<Value, TvCacheError> {
        let metrics = self.resolver.metrics();
        let store = self.resolver.store();
        let key = CacheKey::List(ListKind::Hero);
        let table = key.table().as_str();

        error!(error = %err, "Hero listing fetch failed, checking cached list");

        if store.is_available() {
            match get_within(store.as_ref(), &key, self.resolver.config().fallback_timeout).await {
                Ok(Some(entry)) => {
                    info!(fetched_at = %entry.fetched_at, "Serving cached hero list");
                    metrics.record_fallback(table, "served");
                    metrics.record_hero_run("fallback", None);
                    return Ok(entry.payload);
                }
                Ok(None) => metrics.record_fallback(table, "empty"),
                Err(e) => {
                    warn!(error = %e, "Hero fallback read failed");
                    metrics.record_fallback(table, "error");
                }
            }
        } else {
            metrics.record_fallback(table, "unavailable");
        }

        metrics.record_hero_run("error", None);
        Err(err.into())
    }
}

fn popularity(candidate: &Value) -> f64 {
    candidate.get("popularity").and_then(Value::as_f64).unwrap_or(0.0)
}

/// Most popular first. Ties keep listing order.
fn rank_by_popularity(mut candidates: Vec<Value>) -> Vec<Value> {
    candidates.sort_by(|a, b| popularity(b).total_cmp(&popularity(a)));
    candidates
}

/// Air date of the most recent episode, midnight UTC for bare dates.
fn last_aired(detail: &Value) -> Option<DateTime<Utc>> {
    let raw = detail.get("last_episode_to_air")?.get("air_date")?.as_str()?;

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|at| Utc.from_utc_datetime(&at));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Inclusive `[now - lookback, now + lookahead]`.
struct AirWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl AirWindow {
    fn around(now: DateTime<Utc>, config: &HeroConfig) -> Self {
        Self {
            from: now - Duration::days(config.lookback_days),
            to: now + Duration::days(config.lookahead_days),
        }
    }

    fn contains(&self, detail: &Value) -> bool {
        match last_aired(detail) {
            Some(aired) => aired >= self.from && aired <= self.to,
            None => false,
        }
    }
}
