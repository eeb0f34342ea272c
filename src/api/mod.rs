//! HTTP surface: read-only JSON endpoints over the resolver and the hero
//! curator, plus health and metrics.

pub mod error;
pub mod handlers;

use crate::cache::resolver::CacheAside;
use crate::metrics::SharedMetrics;
use crate::services::hero::HeroCurator;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<CacheAside>,
    pub hero: Arc<HeroCurator>,
    pub metrics: SharedMetrics,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/series/{id}", get(handlers::series_detail))
        .route(
            "/api/series/{id}/season/{season_number}",
            get(handlers::season_detail),
        )
        .route("/api/trending", get(handlers::trending))
        .route("/api/hero/new-episodes", get(handlers::new_episodes))
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request duration by route template, so ids do not explode label cardinality.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    state.metrics.record_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
