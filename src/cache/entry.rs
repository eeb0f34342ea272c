//! Cache keys, tables and entries.
//!
//! Every cached payload lives in one of three logical tables. The table is
//! implied by the shape of the key, so there is no way to look a season key up
//! in the title table.

use crate::error::TvCacheError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Numeric identifier of a title in the upstream catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TitleId(pub u64);

impl TitleId {
    pub fn parse(raw: &str) -> Result<Self, TvCacheError> {
        parse_decimal(raw)
            .map(TitleId)
            .ok_or_else(|| TvCacheError::Validation(format!("Invalid TMDB ID (must be numeric): {:?}", raw)))
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeasonNumber(pub u32);

impl SeasonNumber {
    pub fn parse(raw: &str) -> Result<Self, TvCacheError> {
        parse_decimal(raw)
            .and_then(|n| u32::try_from(n).ok())
            .map(SeasonNumber)
            .ok_or_else(|| {
                TvCacheError::Validation(format!(
                    "Invalid season number (must be numeric): {:?}",
                    raw
                ))
            })
    }
}

impl fmt::Display for SeasonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts plain ASCII digits only: no sign, no fraction, no whitespace.
fn parse_decimal(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Ranked lists kept in the list table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Daily,
    Weekly,
    /// Curated "new episodes" list built by the hero pipeline
    Hero,
}

impl ListKind {
    /// Map the `type` query parameter of the trending endpoint.
    ///
    /// Unknown or missing values fall back to the weekly list rather than
    /// failing the request.
    pub fn trending_from_query(raw: Option<&str>) -> Self {
        match raw {
            Some("daily") => ListKind::Daily,
            _ => ListKind::Weekly,
        }
    }

    /// Stored tag of the list, also used as its document key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Daily => "daily",
            ListKind::Weekly => "weekly",
            ListKind::Hero => "hero",
        }
    }

    /// Upstream trending window for this list, if it is a trending list.
    pub fn upstream_window(&self) -> Option<&'static str> {
        match self {
            ListKind::Daily => Some("day"),
            ListKind::Weekly => Some("week"),
            ListKind::Hero => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTable {
    TitleDetail,
    SeasonDetail,
    RankedList,
}

impl CacheTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTable::TitleDetail => "title_detail",
            CacheTable::SeasonDetail => "season_detail",
            CacheTable::RankedList => "ranked_list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Title(TitleId),
    Season(TitleId, SeasonNumber),
    List(ListKind),
}

impl CacheKey {
    pub fn table(&self) -> CacheTable {
        match self {
            CacheKey::Title(_) => CacheTable::TitleDetail,
            CacheKey::Season(..) => CacheTable::SeasonDetail,
            CacheKey::List(_) => CacheTable::RankedList,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Title(id) => write!(f, "title:{}", id),
            CacheKey::Season(id, season) => write!(f, "season:{}:{}", id, season),
            CacheKey::List(kind) => write!(f, "list:{}", kind.as_str()),
        }
    }
}

/// A stored payload together with its freshness window.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Upstream payload, returned to callers untouched
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Value, ttl: Duration, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            payload,
            fetched_at: now,
            expires_at,
        }
    }

    /// Fresh entries are served without contacting the upstream.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
