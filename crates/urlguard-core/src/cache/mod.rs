//! Report cache
//!
//! Cache-aside storage for aggregate reports keyed by normalized URL. The
//! cache is an optimization only: every operation may fail and callers treat
//! a failure as a miss.

mod memory;
mod redis_cache;

pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;

use crate::aggregator::AggregateReport;
use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Stored report with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub report: AggregateReport,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: &str, report: AggregateReport, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self {
            key: key.to_string(),
            report,
            expires_at: Utc::now() + ttl,
        }
    }

    /// Entries at or past `expires_at` are misses
    pub fn is_fresh(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Report store
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fresh report for `key`, if any
    async fn get(&self, key: &str) -> Result<Option<AggregateReport>, CacheError>;

    /// Set with expiration, overwriting any previous value
    async fn put(&self, key: &str, report: &AggregateReport, ttl: Duration) -> Result<(), CacheError>;

    /// Whether the backend is reachable right now
    async fn is_available(&self) -> bool;
}

/// Cache used when caching is disabled. Every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

#[async_trait]
impl CacheStore for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<AggregateReport>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _report: &AggregateReport, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        false
    }
}

/// Build the configured cache store
pub fn build_cache(config: &CacheConfig) -> Arc<dyn CacheStore> {
    match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.capacity, config.ttl())),
        CacheBackend::Redis => match RedisCache::new(&config.redis_url, config.op_timeout()) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                tracing::warn!("Redis cache disabled: {}", e);
                Arc::new(NullCache)
            }
        },
        CacheBackend::Disabled => Arc::new(NullCache),
    }
}
