use crate::api::error::ApiError;
use crate::api::AppState;
use crate::cache::entry::{ListKind, SeasonNumber, TitleId};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

pub async fn series_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = TitleId::parse(&id)?;
    Ok(Json(state.resolver.title_detail(id).await?))
}

pub async fn season_detail(
    State(state): State<AppState>,
    Path((id, season_number)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let id = TitleId::parse(&id)?;
    let season = SeasonNumber::parse(&season_number)?;
    Ok(Json(state.resolver.season_detail(id, season).await?))
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub async fn trending(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> Result<Json<Value>, ApiError> {
    let kind = ListKind::trending_from_query(query.kind.as_deref());
    Ok(Json(state.resolver.trending(kind).await?))
}

pub async fn new_episodes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.hero.new_episodes().await?))
}

pub async fn root() -> &'static str {
    "tvcache API is running"
}

/// Liveness plus store reachability. The service keeps answering without a
/// store, so an unreachable one only degrades the status.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let store = state.resolver.store();
    let available = store.is_available();

    Json(json!({
        "status": if available { "healthy" } else { "degraded" },
        "store": store.backend(),
        "store_available": available,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
