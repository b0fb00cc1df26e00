use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::model::AggregatedForecast;

/// How long an aggregated forecast stays fresh.
pub const FORECAST_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: AggregatedForecast,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory, time-bounded store of aggregated forecasts.
///
/// Locks are only held for the map operation itself, never across an await
/// on anything else, so concurrent requests only contend for a lookup or
/// an insert.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, or `None` if it is missing or stale.
    ///
    /// A stale entry is evicted on the way out.
    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => {
                    tracing::debug!("Key not found");
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        tracing::debug!("Key found but expired");
        let mut entries = self.entries.write().await;
        // another request may have refreshed it between the two locks
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or overwrites `key`, fresh for `ttl` from now.
    #[tracing::instrument(name = "put_cache", level = "debug", skip(self, value))]
    pub async fn set(&self, key: &str, value: AggregatedForecast, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            expires_at: Instant::now() + ttl,
        };

        self.entries.write().await.insert(key.to_string(), entry);
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, including ones not yet evicted after expiry.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
