//! Key-value cache counter store.
//!
//! Each key holds one serialized list of timestamps. The cache offers no
//! atomic read-modify-write, so every `count` and `record` is a separate
//! fetch followed by a rewrite. Two processes updating the same key at once
//! can overwrite each other's events and under-count; this store reports
//! [`Consistency::BestEffort`] for that reason.
//!
//! `memcache://` URLs connect to a memcached server; `redis://` and
//! `rediss://` URLs use a Redis server as the cache.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tracing::{info, trace};

use super::{namespaced_key, window_start, BackendError, Consistency, CounterStore, StoreKind};
use crate::clock::Clock;
use crate::monitor::Monitor;

/// Connection handle for a key-value cache with per-key expiry.
#[async_trait]
pub trait CacheConnection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// Memcached treats expirations above this many seconds as absolute Unix times.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Open a cache connection for `url`, picking the client from its scheme.
pub async fn connect_cache(url: &str) -> Result<Arc<dyn CacheConnection>, BackendError> {
    if is_redis_url(url) {
        Ok(Arc::new(RedisCacheConnection::connect(url).await?))
    } else {
        Ok(Arc::new(MemcacheConnection::connect(url).await?))
    }
}

fn is_redis_url(url: &str) -> bool {
    url.starts_with("redis://") || url.starts_with("rediss://")
}

/// Expiration argument for a memcached `set` holding a value for `ttl_secs`.
fn memcache_expiration(ttl_secs: u64) -> u32 {
    let expiration = if ttl_secs <= MAX_RELATIVE_EXPIRATION {
        ttl_secs
    } else {
        (Utc::now().timestamp().max(0) as u64).saturating_add(ttl_secs)
    };
    u32::try_from(expiration).unwrap_or(u32::MAX)
}

/// [`CacheConnection`] on a memcached server.
///
/// The `memcache` client is blocking, so every call runs on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct MemcacheConnection {
    client: Arc<memcache::Client>,
}

impl MemcacheConnection {
    /// Connect to `url`, e.g. `memcache://127.0.0.1:11211`.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let url = url.to_string();
        let client = blocking(move || memcache::Client::connect(url)).await?;
        info!("Connected key-value cache store to memcached");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: memcache::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

/// Run a blocking memcached call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, memcache::MemcacheError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?
        .map_err(BackendError::from)
}

#[async_trait]
impl CacheConnection for MemcacheConnection {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let client = self.client.clone();
        let key = key.to_string();
        blocking(move || client.get::<String>(&key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), BackendError> {
        let client = self.client.clone();
        let key = key.to_string();
        let value = value.to_string();
        let expiration = memcache_expiration(ttl_secs);
        blocking(move || client.set(&key, value.as_str(), expiration)).await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let client = self.client.clone();
        let key = key.to_string();
        blocking(move || client.delete(&key)).await?;
        Ok(())
    }
}

/// [`CacheConnection`] speaking plain `GET`/`SET EX`/`DEL` through the Redis client.
#[derive(Clone)]
pub struct RedisCacheConnection {
    connection: MultiplexedConnection,
}

impl RedisCacheConnection {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected key-value cache store");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CacheConnection for RedisCacheConnection {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// Counter store on a key-value cache.
pub struct MemcachedStore {
    connection: Arc<dyn CacheConnection>,
    clock: Arc<dyn Clock>,
    monitor: Monitor,
}

impl fmt::Debug for MemcachedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedStore")
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl MemcachedStore {
    pub fn new(
        connection: Arc<dyn CacheConnection>,
        clock: Arc<dyn Clock>,
        monitor: Monitor,
    ) -> Self {
        Self {
            connection,
            clock,
            monitor,
        }
    }

    /// Fetch the stored timestamps for `key`, keeping only those at or after `min_time`.
    ///
    /// An undecodable value is reported and read as empty, so the next write
    /// replaces it.
    async fn fetch_live(&self, key: &str, min_time: f64) -> Result<Vec<f64>, BackendError> {
        let timestamps: Vec<f64> = match self.connection.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                self.monitor
                    .log_store_error("MemcachedStore", "decode", &BackendError::Codec(e));
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(timestamps.into_iter().filter(|&ts| ts >= min_time).collect())
    }

    async fn store(&self, key: &str, timestamps: &[f64], period: u64) -> Result<(), BackendError> {
        let raw = serde_json::to_string(timestamps)?;
        self.connection.set(key, &raw, period).await
    }

    async fn try_count(&self, key: &str, period: u64) -> Result<u64, BackendError> {
        let min_time = window_start(self.clock.now(), period);
        let timestamps = self.fetch_live(key, min_time).await?;

        if timestamps.is_empty() {
            self.connection.delete(key).await?;
        } else {
            self.store(key, &timestamps, period).await?;
        }
        Ok(timestamps.len() as u64)
    }

    async fn try_record(&self, key: &str, period: u64) -> Result<u64, BackendError> {
        let now = self.clock.now();
        let mut timestamps = self.fetch_live(key, window_start(now, period)).await?;
        timestamps.push(now);
        self.store(key, &timestamps, period).await?;
        Ok(timestamps.len() as u64)
    }
}

#[async_trait]
impl CounterStore for MemcachedStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memcached
    }

    fn consistency(&self) -> Consistency {
        Consistency::BestEffort
    }

    async fn count(&self, key: &str, period: u64) -> u64 {
        let key = namespaced_key(key);
        match self.try_count(&key, period).await {
            Ok(count) => {
                trace!(key = %key, count, "Counted cached events");
                count
            }
            Err(e) => {
                self.monitor.log_store_error("MemcachedStore", "count", &e);
                0
            }
        }
    }

    async fn record(&self, key: &str, period: u64) -> u64 {
        let key = namespaced_key(key);
        match self.try_record(&key, period).await {
            Ok(count) => count,
            Err(e) => {
                self.monitor.log_store_error("MemcachedStore", "record", &e);
                0
            }
        }
    }
}
