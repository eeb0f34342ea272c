pub mod api;

use crate::cache::entry::{ListKind, SeasonNumber, TitleId};
use crate::error::UpstreamError;
use async_trait::async_trait;
use serde_json::Value;

/// The four calls this service makes against the media-metadata API.
///
/// Payloads are returned as raw JSON and passed through to callers unchanged.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Title detail with credits, images, videos, cross references,
    /// recommendations, similar titles, ratings, reviews, providers and
    /// translations bundled in.
    async fn title_detail(&self, id: TitleId) -> Result<Value, UpstreamError>;

    async fn season_detail(&self, id: TitleId, season: SeasonNumber) -> Result<Value, UpstreamError>;

    /// Ranked list for the trending window of `kind`, as a JSON array.
    async fn trending(&self, kind: ListKind) -> Result<Value, UpstreamError>;

    /// Broad "currently airing" listing used as hero candidates.
    async fn on_the_air(&self) -> Result<Vec<Value>, UpstreamError>;
}
