use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TvCacheError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl TvCacheError {
    /// HTTP status to report for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            TvCacheError::Validation(_) => 400,
            TvCacheError::Upstream(err) => match err.status {
                Some(status) if (400..600).contains(&status) => status,
                _ => 500,
            },
            TvCacheError::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TvCacheError::Validation(_) => "validation_error",
            TvCacheError::Upstream(_) => "upstream_error",
            TvCacheError::Internal(_) => "internal_error",
        }
    }
}

/// Failure talking to the media-metadata API.
///
/// `Clone` so a single failed fetch can be handed to every caller that was
/// waiting on the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Upstream API error: {message}")]
pub struct UpstreamError {
    /// HTTP status returned by the upstream, if a response was received at all.
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store is unavailable")]
    Unavailable,

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("store operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err = TvCacheError::Validation("Invalid TMDB ID".into());
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn upstream_status_is_mirrored() {
        let err = TvCacheError::from(UpstreamError::status(404, "not found"));
        assert_eq!(err.http_status(), 404);

        let err = TvCacheError::from(UpstreamError::status(429, "slow down"));
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn upstream_without_status_is_500() {
        let err = TvCacheError::from(UpstreamError::transport("connection reset"));
        assert_eq!(err.http_status(), 500);

        // A success status can never be reported as a failure
        let err = TvCacheError::from(UpstreamError::status(200, "odd"));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn internal_is_500() {
        let err = TvCacheError::Internal("fetch task panicked".into());
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.code(), "internal_error");
    }
}
