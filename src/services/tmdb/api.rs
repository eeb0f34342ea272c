use crate::cache::entry::{ListKind, SeasonNumber, TitleId};
use crate::config::TmdbConfig;
use crate::error::UpstreamError;
use crate::services::tmdb::UpstreamClient;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};

const TITLE_APPEND: &str = "credits,images,videos,external_ids,recommendations,similar,content_ratings,reviews,watch/providers,translations";
const SEASON_APPEND: &str = "images,videos,credits";

#[derive(Clone)]
pub struct TmdbApi {
    client: Client,
    base_url: String,
    api_key: String,
    timezone: String,
}

impl TmdbApi {
    pub fn new(config: &TmdbConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.timeout)
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timezone: config.timezone.clone(),
        }
    }

    /// Single GET against the API. Non-2xx responses keep their status code;
    /// transport failures and timeouts carry none. There is no retry here.
    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let start = Instant::now();

        debug!(path = path, "Sending request to TMDB");

        let resp = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors embed the request URL, which carries the API key
                let e = e.without_url();
                debug!(
                    path = path,
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Request failed"
                );
                UpstreamError::transport(format!("TMDB request failed: {}", e))
            })?;

        let status = resp.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(path = path, status = %status, elapsed_ms = elapsed_ms, "Error status from TMDB");
            return Err(UpstreamError::status(
                status.as_u16(),
                error_message(status.as_u16(), &body),
            ));
        }

        debug!(path = path, status = %status, elapsed_ms = elapsed_ms, "Request successful");

        let body: Value = resp
            .json()
            .await
            .map_err(|e| {
                UpstreamError::transport(format!("TMDB returned invalid JSON: {}", e.without_url()))
            })?;

        trace!(path = path, "Response body received");
        Ok(body)
    }
}

/// Prefer TMDB's own `status_message` when the error body carries one.
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("status_message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("TMDB responded with HTTP {}", status))
}

/// The `results` array of a listing response; a missing field is an empty list.
fn listing_results(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[async_trait]
impl UpstreamClient for TmdbApi {
    #[instrument(skip(self), fields(call = "title_detail"))]
    async fn title_detail(&self, id: TitleId) -> Result<Value, UpstreamError> {
        self.get_json(&format!("/tv/{}", id), &[("append_to_response", TITLE_APPEND)])
            .await
    }

    #[instrument(skip(self), fields(call = "season_detail"))]
    async fn season_detail(&self, id: TitleId, season: SeasonNumber) -> Result<Value, UpstreamError> {
        self.get_json(
            &format!("/tv/{}/season/{}", id, season),
            &[("append_to_response", SEASON_APPEND)],
        )
        .await
    }

    #[instrument(skip(self), fields(call = "trending"))]
    async fn trending(&self, kind: ListKind) -> Result<Value, UpstreamError> {
        let window = kind
            .upstream_window()
            .ok_or_else(|| UpstreamError::transport(format!("{:?} is not a trending list", kind)))?;
        let body = self.get_json(&format!("/trending/tv/{}", window), &[]).await?;
        Ok(Value::Array(listing_results(body)))
    }

    #[instrument(skip(self), fields(call = "on_the_air"))]
    async fn on_the_air(&self) -> Result<Vec<Value>, UpstreamError> {
        let body = self
            .get_json("/tv/on_the_air", &[("timezone", self.timezone.as_str())])
            .await?;
        Ok(listing_results(body))
    }
}
