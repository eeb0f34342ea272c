use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const DEFAULT_TMDB_TIMEOUT_MS: u64 = 8000;
const DEFAULT_TMDB_TIMEZONE: &str = "America/New_York";

const HOUR: u64 = 60 * 60;
/// Caps the hero air-date window so date arithmetic cannot overflow
const MAX_WINDOW_DAYS: u64 = 3650;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Timezone the "currently airing" listing is evaluated in
    pub timezone: String,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// When unset the process-local memory store is used
    pub mongo_url: Option<String>,
    pub mongo_db: String,
    pub server_selection_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub title_ttl: Duration,
    pub season_ttl: Duration,
    pub list_ttl: Duration,
    /// Upper bound on a degraded-mode read of an expired entry
    pub fallback_timeout: Duration,
    /// Share one upstream call between concurrent misses on the same key
    pub coalesce: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            title_ttl: Duration::from_secs(24 * HOUR),
            season_ttl: Duration::from_secs(24 * HOUR),
            list_ttl: Duration::from_secs(6 * HOUR),
            fallback_timeout: Duration::from_millis(500),
            coalesce: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeroConfig {
    pub candidates: usize,
    pub limit: usize,
    pub lookback_days: i64,
    pub lookahead_days: i64,
    pub refine_concurrency: usize,
}

impl Default for HeroConfig {
    fn default() -> Self {
        Self {
            candidates: 15,
            limit: 5,
            lookback_days: 7,
            lookahead_days: 1,
            refine_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub tmdb: TmdbConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub hero: HeroConfig,
    /// Enable debug logging for upstream requests (set via CLI)
    pub debug_requests: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &str, default: u64| -> u64 {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let api_key = lookup("TMDB_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .context("TMDB_API_KEY is required")?;

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got {:?}", raw))?,
            None => DEFAULT_PORT,
        };

        let coalesce = lookup("UPSTREAM_COALESCE")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        let hero_defaults = HeroConfig::default();

        Ok(Self {
            server: ServerConfig { port },
            tmdb: TmdbConfig {
                api_url: lookup("TMDB_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key,
                timeout: Duration::from_millis(parsed("TMDB_TIMEOUT_MS", DEFAULT_TMDB_TIMEOUT_MS)),
                timezone: lookup("TMDB_TIMEZONE")
                    .unwrap_or_else(|| DEFAULT_TMDB_TIMEZONE.to_string()),
            },
            store: StoreConfig {
                mongo_url: lookup("MONGODB_URI").filter(|v| !v.trim().is_empty()),
                mongo_db: lookup("MONGO_DB").unwrap_or_else(|| "tvcache".to_string()),
                server_selection_timeout: Duration::from_millis(parsed(
                    "MONGO_SELECTION_TIMEOUT_MS",
                    3000,
                )),
                heartbeat_interval: Duration::from_secs(parsed("STORE_HEARTBEAT_SECS", 10).max(1)),
                sweep_interval: Duration::from_secs(parsed("MEMORY_SWEEP_SECS", 60).max(1)),
            },
            cache: CacheConfig {
                title_ttl: Duration::from_secs(parsed("TITLE_TTL_HOURS", 24).saturating_mul(HOUR)),
                season_ttl: Duration::from_secs(parsed("SEASON_TTL_HOURS", 24).saturating_mul(HOUR)),
                list_ttl: Duration::from_secs(parsed("LIST_TTL_HOURS", 6).saturating_mul(HOUR)),
                fallback_timeout: Duration::from_millis(parsed("FALLBACK_READ_TIMEOUT_MS", 500)),
                coalesce,
            },
            hero: HeroConfig {
                candidates: parsed("HERO_CANDIDATES", hero_defaults.candidates as u64) as usize,
                limit: parsed("HERO_LIMIT", hero_defaults.limit as u64) as usize,
                lookback_days: parsed("HERO_LOOKBACK_DAYS", hero_defaults.lookback_days as u64)
                    .min(MAX_WINDOW_DAYS) as i64,
                lookahead_days: parsed("HERO_LOOKAHEAD_DAYS", hero_defaults.lookahead_days as u64)
                    .min(MAX_WINDOW_DAYS) as i64,
                refine_concurrency: (parsed(
                    "HERO_REFINE_CONCURRENCY",
                    hero_defaults.refine_concurrency as u64,
                ) as usize)
                    .max(1),
            },
            debug_requests: false, // Set by CLI args in main.rs
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = config_from(&[("TMDB_API_KEY", "secret")]).unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.tmdb.api_url, "https://api.themoviedb.org/3");
        assert_eq!(config.tmdb.timeout, Duration::from_secs(8));
        assert_eq!(config.cache.title_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.cache.season_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.cache.list_ttl, Duration::from_secs(6 * 3600));
        assert_eq!(config.cache.fallback_timeout, Duration::from_millis(500));
        assert!(config.cache.coalesce);
        assert!(config.store.mongo_url.is_none());
        assert_eq!(config.hero.candidates, 15);
        assert_eq!(config.hero.limit, 5);
        assert_eq!(config.hero.lookback_days, 7);
        assert_eq!(config.hero.lookahead_days, 1);
    }

    #[test]
    fn api_key_is_required() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("TMDB_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn bad_port_is_an_error_but_bad_tuning_falls_back() {
        assert!(config_from(&[("TMDB_API_KEY", "k"), ("PORT", "http")]).is_err());

        let config = config_from(&[
            ("TMDB_API_KEY", "k"),
            ("TITLE_TTL_HOURS", "soon"),
            ("HERO_LIMIT", "3"),
        ])
        .unwrap();
        assert_eq!(config.cache.title_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.hero.limit, 3);
    }

    #[test]
    fn coalescing_can_be_disabled() {
        let config = config_from(&[("TMDB_API_KEY", "k"), ("UPSTREAM_COALESCE", "false")]).unwrap();
        assert!(!config.cache.coalesce);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = config_from(&[
            ("TMDB_API_KEY", "k"),
            ("TMDB_BASE_URL", "http://localhost:9000/3/"),
        ])
        .unwrap();
        assert_eq!(config.tmdb.api_url, "http://localhost:9000/3");
    }
}
