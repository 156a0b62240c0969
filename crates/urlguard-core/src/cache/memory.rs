//! In-process report cache

use super::{CacheEntry, CacheStore};
use crate::aggregator::AggregateReport;
use crate::error::CacheError;
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

/// Bounded in-memory cache.
///
/// moka's time-to-live caps every entry at `max_ttl`; shorter per-entry TTLs
/// are enforced on read through `CacheEntry::expires_at`.
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new(capacity: u64, max_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(max_ttl)
            .build();

        Self { cache }
    }

    /// Current entry count (approximate)
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.entry_count() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100_000, Duration::from_secs(3600))
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<AggregateReport>, CacheError> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_fresh() => Ok(Some(entry.report)),
            Some(_) => {
                self.cache.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, report: &AggregateReport, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key, report.clone(), ttl);
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
