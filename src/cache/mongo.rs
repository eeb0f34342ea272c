//! MongoDB-backed cache store.
//!
//! One collection per table. Each collection carries a unique index on its key
//! fields and a TTL index on `expires_at`, so the server evicts expired
//! documents on its own schedule (roughly once a minute, never exactly at
//! expiry).

use crate::cache::entry::{CacheEntry, CacheKey, CacheTable};
use crate::cache::store::CacheStore;
use crate::config::StoreConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SERIES_COLLECTION: &str = "series_cache";
const SEASON_COLLECTION: &str = "season_cache";
const TRENDING_COLLECTION: &str = "trending_cache";

pub struct MongoStore {
    db: Database,
    series: Collection<Document>,
    seasons: Collection<Document>,
    lists: Collection<Document>,
    available: AtomicBool,
    indexes_ready: AtomicBool,
}

impl MongoStore {
    /// Build the client. This does not contact the server; reachability is
    /// established by [`MongoStore::ping`].
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mongo_url = config.mongo_url.as_deref().ok_or(StoreError::Unavailable)?;

        let mut client_options = ClientOptions::parse(mongo_url).await?;
        client_options.app_name = Some("tvcache".to_string());
        client_options.server_selection_timeout = Some(config.server_selection_timeout);

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.mongo_db);

        info!(database = %config.mongo_db, "MongoDB client configured");

        Ok(Self {
            series: db.collection(SERIES_COLLECTION),
            seasons: db.collection(SEASON_COLLECTION),
            lists: db.collection(TRENDING_COLLECTION),
            db,
            available: AtomicBool::new(false),
            indexes_ready: AtomicBool::new(false),
        })
    }

    fn collection(&self, table: CacheTable) -> &Collection<Document> {
        match table {
            CacheTable::TitleDetail => &self.series,
            CacheTable::SeasonDetail => &self.seasons,
            CacheTable::RankedList => &self.lists,
        }
    }

    /// Check reachability and update the availability flag. Indexes are
    /// created the first time the server answers.
    pub async fn ping(&self) -> bool {
        let reachable = match self.db.run_command(doc! { "ping": 1 }, None).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "MongoDB ping failed");
                false
            }
        };

        let was_available = self.available.swap(reachable, Ordering::Relaxed);
        if reachable && !was_available {
            info!("MongoDB reachable, cache store available");
        } else if !reachable && was_available {
            warn!("MongoDB unreachable, cache store marked unavailable");
        }

        if reachable && !self.indexes_ready.load(Ordering::Relaxed) {
            match self.ensure_indexes().await {
                Ok(()) => self.indexes_ready.store(true, Ordering::Relaxed),
                Err(e) => warn!(error = %e, "Failed to create cache indexes"),
            }
        }

        reachable
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        let ttl = || {
            IndexModel::builder()
                .keys(doc! { "expires_at": 1 })
                .options(IndexOptions::builder().expire_after(Duration::ZERO).build())
                .build()
        };

        self.series.create_index(unique(doc! { "tmdb_id": 1 }), None).await?;
        self.seasons
            .create_index(unique(doc! { "tmdb_id": 1, "season_number": 1 }), None)
            .await?;
        self.lists.create_index(unique(doc! { "type": 1 }), None).await?;

        for collection in [&self.series, &self.seasons, &self.lists] {
            collection.create_index(ttl(), None).await?;
        }

        info!("Cache collection indexes ensured");
        Ok(())
    }

    /// Ping on a fixed interval until `shutdown_rx` flips to true.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.ping().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("MongoDB heartbeat stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CacheStore for MongoStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let filter = key_filter(key)?;
        match self.collection(key.table()).find_one(filter, None).await? {
            Some(document) => entry_from_document(*key, &document).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), StoreError> {
        let entry = CacheEntry::new(*key, payload, ttl, Utc::now());
        let options = UpdateOptions::builder().upsert(true).build();

        self.collection(key.table())
            .update_one(key_filter(key)?, entry_update(&entry)?, options)
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}

fn key_filter(key: &CacheKey) -> Result<Document, StoreError> {
    Ok(match key {
        CacheKey::Title(id) => doc! { "tmdb_id": bson_id(id.0)? },
        CacheKey::Season(id, season) => doc! {
            "tmdb_id": bson_id(id.0)?,
            "season_number": i64::from(season.0),
        },
        CacheKey::List(kind) => doc! { "type": kind.as_str() },
    })
}

fn bson_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Encoding(format!("id {} does not fit in int64", id)))
}

fn to_bson_datetime(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

/// `$set` document for an upsert. Key fields come from the filter.
fn entry_update(entry: &CacheEntry) -> Result<Document, StoreError> {
    Ok(doc! {
        "$set": {
            "data": bson::to_bson(&entry.payload)?,
            "fetched_at": to_bson_datetime(entry.fetched_at),
            "expires_at": to_bson_datetime(entry.expires_at),
        }
    })
}

fn entry_from_document(key: CacheKey, document: &Document) -> Result<CacheEntry, StoreError> {
    let read_time = |field: &str| -> Result<DateTime<Utc>, StoreError> {
        let millis = document
            .get_datetime(field)
            .map_err(|e| StoreError::Encoding(format!("{}: {}", field, e)))?
            .timestamp_millis();
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| StoreError::Encoding(format!("{} out of range", field)))
    };

    let payload = document
        .get("data")
        .cloned()
        .map(Bson::into_relaxed_extjson)
        .ok_or_else(|| StoreError::Encoding("document has no data field".to_string()))?;

    Ok(CacheEntry {
        key,
        payload,
        fetched_at: read_time("fetched_at")?,
        expires_at: read_time("expires_at")?,
    })
}
