//! Prometheus metrics for monitoring tvcache.
//!
//! Covers cache effectiveness (hits, misses, stale fallbacks), background
//! writes, upstream health, hero curation runs and HTTP latency.

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// All metrics for the tvcache service
pub struct Metrics {
    pub registry: Registry,

    // Cache metrics
    pub cache_lookups_total: CounterVec,
    pub cache_fallbacks_total: CounterVec,
    pub cache_writes_total: CounterVec,
    pub store_available: Gauge,

    // Upstream metrics
    pub upstream_requests_total: CounterVec,
    pub upstream_request_duration_seconds: HistogramVec,
    pub upstream_coalesced_total: CounterVec,

    // Curation metrics
    pub hero_runs_total: CounterVec,
    pub hero_last_result_size: Gauge,

    // HTTP metrics
    pub http_request_duration_seconds: HistogramVec,

    // System metrics
    pub uptime_seconds: Gauge,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_lookups_total = CounterVec::new(
            Opts::new("tvcache_cache_lookups_total", "Cache lookups by outcome"),
            &["table", "outcome"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let cache_fallbacks_total = CounterVec::new(
            Opts::new(
                "tvcache_cache_fallbacks_total",
                "Stale fallback attempts after upstream failure",
            ),
            &["table", "result"],
        )?;
        registry.register(Box::new(cache_fallbacks_total.clone()))?;

        let cache_writes_total = CounterVec::new(
            Opts::new("tvcache_cache_writes_total", "Background cache writes"),
            &["table", "status"],
        )?;
        registry.register(Box::new(cache_writes_total.clone()))?;

        let store_available = Gauge::with_opts(Opts::new(
            "tvcache_store_available",
            "Whether the cache store is reachable (0 or 1)",
        ))?;
        registry.register(Box::new(store_available.clone()))?;

        let upstream_requests_total = CounterVec::new(
            Opts::new("tvcache_upstream_requests_total", "Upstream API requests"),
            &["call", "status"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tvcache_upstream_request_duration_seconds",
                "Upstream request duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 8.0]),
            &["call"],
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        let upstream_coalesced_total = CounterVec::new(
            Opts::new(
                "tvcache_upstream_coalesced_total",
                "Requests that joined an in-flight upstream call",
            ),
            &["table"],
        )?;
        registry.register(Box::new(upstream_coalesced_total.clone()))?;

        let hero_runs_total = CounterVec::new(
            Opts::new("tvcache_hero_runs_total", "Hero curation runs by result"),
            &["status"],
        )?;
        registry.register(Box::new(hero_runs_total.clone()))?;

        let hero_last_result_size = Gauge::with_opts(Opts::new(
            "tvcache_hero_last_result_size",
            "Number of titles in the last curated hero list",
        ))?;
        registry.register(Box::new(hero_last_result_size.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tvcache_http_request_duration_seconds",
                "API request duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["endpoint", "status"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "tvcache_uptime_seconds",
            "Time since process start",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            cache_lookups_total,
            cache_fallbacks_total,
            cache_writes_total,
            store_available,
            upstream_requests_total,
            upstream_request_duration_seconds,
            upstream_coalesced_total,
            hero_runs_total,
            hero_last_result_size,
            http_request_duration_seconds,
            uptime_seconds,
        })
    }

    /// Record a cache lookup (`hit`, `stale`, `miss`, `error` or `bypass`)
    pub fn record_lookup(&self, table: &str, outcome: &str) {
        self.cache_lookups_total
            .with_label_values(&[table, outcome])
            .inc();
    }

    /// Record a stale fallback attempt (`served`, `empty`, `error` or `unavailable`)
    pub fn record_fallback(&self, table: &str, result: &str) {
        self.cache_fallbacks_total
            .with_label_values(&[table, result])
            .inc();
    }

    pub fn record_store_write(&self, table: &str, status: &str) {
        self.cache_writes_total
            .with_label_values(&[table, status])
            .inc();
    }

    /// Record an upstream request
    pub fn record_upstream(&self, call: &str, status: &str, duration_secs: f64) {
        self.upstream_requests_total
            .with_label_values(&[call, status])
            .inc();
        self.upstream_request_duration_seconds
            .with_label_values(&[call])
            .observe(duration_secs);
    }

    pub fn record_coalesced(&self, table: &str) {
        self.upstream_coalesced_total
            .with_label_values(&[table])
            .inc();
    }

    pub fn record_hero_run(&self, status: &str, result_size: Option<usize>) {
        self.hero_runs_total.with_label_values(&[status]).inc();
        if let Some(size) = result_size {
            self.hero_last_result_size.set(size as f64);
        }
    }

    pub fn record_request(&self, endpoint: &str, status: u16, duration_secs: f64) {
        self.http_request_duration_seconds
            .with_label_values(&[endpoint, &status.to_string()])
            .observe(duration_secs);
    }

    pub fn set_store_available(&self, available: bool) {
        self.store_available.set(if available { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}
