//! Redis-backed report cache

use super::{CacheEntry, CacheStore};
use crate::aggregator::AggregateReport;
use crate::error::CacheError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "urlguard:report:v1:";

/// How long a failed server is skipped before the next connect attempt
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

enum Link {
    Idle,
    Connecting,
    Ready(ConnectionManager),
    Down(Instant),
}

/// Shared cache on Redis.
///
/// The connection is opened on first use by a single background task; callers
/// that arrive meanwhile, or while the server is marked down, get
/// `CacheError::Unavailable` at once. Every command is bounded by `op_timeout`.
pub struct RedisCache {
    client: redis::Client,
    link: Arc<Mutex<Link>>,
    op_timeout: Duration,
    retry_after: Duration,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("op_timeout", &self.op_timeout)
            .field("retry_after", &self.retry_after)
            .finish()
    }
}

impl RedisCache {
    /// Validate the URL; does not connect
    pub fn new(redis_url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Backend(format!("Failed to create Redis client: {e}")))?;

        Ok(Self {
            client,
            link: Arc::new(Mutex::new(Link::Idle)),
            op_timeout,
            retry_after: DEFAULT_RETRY_AFTER,
        })
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Key under which a normalized URL is stored
    pub fn key_for(url: &str) -> String {
        format!("{KEY_PREFIX}{url}")
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        {
            let mut link = self.link.lock();
            match &*link {
                Link::Ready(conn) => return Ok(conn.clone()),
                Link::Connecting => {
                    return Err(CacheError::Unavailable("Redis connection in progress".into()));
                }
                Link::Down(until) if Instant::now() < *until => {
                    return Err(CacheError::Unavailable("Redis marked down".into()));
                }
                Link::Down(_) | Link::Idle => {}
            }
            *link = Link::Connecting;
        }

        // Detached: completes even if this caller is dropped.
        let client = self.client.clone();
        let link = Arc::clone(&self.link);
        let (op_timeout, retry_after) = (self.op_timeout, self.retry_after);
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(op_timeout, ConnectionManager::new(client)).await {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(e)) => Err(format!("Failed to connect to Redis: {e}")),
                Err(_) => Err(format!("Redis did not answer within {op_timeout:?}")),
            };
            match result {
                Ok(conn) => {
                    *link.lock() = Link::Ready(conn.clone());
                    info!("Connected to Redis cache");
                    Ok(conn)
                }
                Err(msg) => {
                    *link.lock() = Link::Down(Instant::now() + retry_after);
                    warn!("{}; retrying in {:?}", msg, retry_after);
                    Err(CacheError::Unavailable(msg))
                }
            }
        });

        task.await
            .map_err(|e| CacheError::Unavailable(format!("Redis connect task failed: {e}")))?
    }

    fn mark_down(&self) {
        *self.link.lock() = Link::Down(Instant::now() + self.retry_after);
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, CacheError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                self.mark_down();
                Err(CacheError::Unavailable(format!(
                    "Redis did not answer within {:?}",
                    self.op_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<AggregateReport>, CacheError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = self
            .bounded(conn.get(Self::key_for(key)))
            .await?
            .map_err(|e| CacheError::Backend(format!("Redis GET failed: {e}")))?;

        match data {
            Some(json) => {
                let entry: CacheEntry = serde_json::from_str(&json)
                    .map_err(|e| CacheError::Serialization(format!("Failed to deserialize cache entry: {e}")))?;
                if entry.is_fresh() {
                    debug!("Cache HIT: {}", key);
                    Ok(Some(entry.report))
                } else {
                    debug!("Cache STALE: {}", key);
                    Ok(None)
                }
            }
            None => {
                debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, report: &AggregateReport, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key, report.clone(), ttl);
        let json = serde_json::to_string(&entry)
            .map_err(|e| CacheError::Serialization(format!("Failed to serialize cache entry: {e}")))?;

        let mut conn = self.connection().await?;
        self.bounded(conn.set_ex::<_, _, ()>(Self::key_for(key), json, ttl.as_secs().max(1)))
            .await?
            .map_err(|e| CacheError::Backend(format!("Redis SETEX failed: {e}")))?;

        debug!("Cache SET: {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        matches!(
            self.bounded(redis::cmd("PING").query_async::<String>(&mut conn)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::invalid_input_report;

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            RedisCache::new("not-a-redis-url", Duration::from_millis(100)),
            Err(CacheError::Backend(_))
        ));
    }

    #[test]
    fn test_key_prefix() {
        assert_eq!(RedisCache::key_for("http://example.com"), "urlguard:report:v1:http://example.com");
    }

    #[tokio::test]
    async fn test_unreachable_server_degrades() {
        let cache = RedisCache::new("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
        let report = invalid_input_report("x", "y");

        assert!(!cache.is_available().await);
        assert!(cache.get("k").await.is_err());
        assert!(cache.put("k", &report, Duration::from_secs(60)).await.is_err());
    }

    #[tokio::test]
    async fn test_silent_server_bounds_concurrent_gets() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and never reply
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let op_timeout = Duration::from_millis(200);
        let cache = Arc::new(RedisCache::new(&format!("redis://{addr}/"), op_timeout).unwrap());

        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let t = Instant::now();
                    let result = cache.get(&format!("k{i}")).await;
                    (result, t.elapsed())
                })
            })
            .collect();

        for handle in handles {
            let (result, elapsed) = handle.await.unwrap();
            assert!(matches!(result, Err(CacheError::Unavailable(_))));
            assert!(elapsed < op_timeout * 2, "single get took {elapsed:?}");
        }
        assert!(started.elapsed() < op_timeout * 3, "gets were serialized: {:?}", started.elapsed());

        // marked down: no new dial
        let t = Instant::now();
        assert!(cache.get("again").await.is_err());
        assert!(t.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retry_after_backoff_expires() {
        let cache = RedisCache::new("redis://127.0.0.1:1/", Duration::from_millis(200))
            .unwrap()
            .with_retry_after(Duration::from_millis(50));

        assert!(cache.get("k").await.is_err());
        assert!(matches!(*cache.link.lock(), Link::Down(_)));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(cache.get("k").await, Err(CacheError::Unavailable(msg)) if msg.contains("connect")));
    }
}
