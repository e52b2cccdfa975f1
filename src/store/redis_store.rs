//! Sorted-set counter store.
//!
//! Each key is a sorted set whose members are event timestamps scored by
//! themselves. Two events recorded at the same instant collapse into one
//! member; at sub-second resolution this is an accepted approximation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tracing::{info, trace};

use super::{namespaced_key, window_start, BackendError, Consistency, CounterStore, StoreKind};
use crate::clock::Clock;
use crate::monitor::Monitor;

/// Connection handle for a sorted-set server.
///
/// Each method is one round-trip executed as a single batch. The batch is
/// atomic on the server, but nothing orders it against other clients'
/// batches for the same key.
#[async_trait]
pub trait SortedSetConnection: Send + Sync {
    /// Remove members scored at or below `stale_at`, then return the cardinality.
    async fn trim_and_count(&self, key: &str, stale_at: f64) -> Result<u64, BackendError>;

    /// Remove members scored at or below `stale_at`, add `now`, set the key to
    /// expire after `ttl_secs`, and return the cardinality.
    async fn add_and_count(
        &self,
        key: &str,
        now: f64,
        stale_at: f64,
        ttl_secs: u64,
    ) -> Result<u64, BackendError>;
}

/// [`SortedSetConnection`] over a Redis multiplexed connection.
#[derive(Clone)]
pub struct RedisSortedSetConnection {
    connection: MultiplexedConnection,
}

impl RedisSortedSetConnection {
    /// Open a multiplexed connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected sorted-set store to Redis");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl SortedSetConnection for RedisSortedSetConnection {
    async fn trim_and_count(&self, key: &str, stale_at: f64) -> Result<u64, BackendError> {
        let mut conn = self.connection.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(stale_at)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn add_and_count(
        &self,
        key: &str,
        now: f64,
        stale_at: f64,
        ttl_secs: u64,
    ) -> Result<u64, BackendError> {
        let mut conn = self.connection.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(stale_at)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(now.to_string())
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// Counter store on a sorted-set server.
pub struct RedisStore {
    connection: Arc<dyn SortedSetConnection>,
    clock: Arc<dyn Clock>,
    monitor: Monitor,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    pub fn new(
        connection: Arc<dyn SortedSetConnection>,
        clock: Arc<dyn Clock>,
        monitor: Monitor,
    ) -> Self {
        Self {
            connection,
            clock,
            monitor,
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Redis
    }

    fn consistency(&self) -> Consistency {
        Consistency::Atomic
    }

    async fn count(&self, key: &str, period: u64) -> u64 {
        let key = namespaced_key(key);
        let stale_at = window_start(self.clock.now(), period);

        match self.connection.trim_and_count(&key, stale_at).await {
            Ok(count) => {
                trace!(key = %key, count, "Counted sorted-set events");
                count
            }
            Err(e) => {
                self.monitor.log_store_error("RedisStore", "count", &e);
                0
            }
        }
    }

    async fn record(&self, key: &str, period: u64) -> u64 {
        let key = namespaced_key(key);
        let now = self.clock.now();
        let stale_at = window_start(now, period);

        match self.connection.add_and_count(&key, now, stale_at, period).await {
            Ok(count) => count,
            Err(e) => {
                self.monitor.log_store_error("RedisStore", "record", &e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::monitor::tests::RecordingSink;
    use crate::store::testing::FakeSortedSet;

    struct Fixture {
        store: RedisStore,
        backend: Arc<FakeSortedSet>,
        clock: ManualClock,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(FakeSortedSet::default());
        let clock = ManualClock::new(1_700_000_000.0);
        let sink = Arc::new(RecordingSink::default());
        let store = RedisStore::new(
            backend.clone(),
            Arc::new(clock.clone()),
            Monitor::new(Some(sink.clone())),
        );
        Fixture {
            store,
            backend,
            clock,
            sink,
        }
    }

    #[tokio::test]
    async fn test_record_and_count() {
        let f = fixture();
        for _ in 0..5 {
            f.clock.advance(0.001);
            f.store.record("test_key", 60).await;
        }

        assert_eq!(f.store.count("test_key", 60).await, 5);
    }

    #[tokio::test]
    async fn test_record_uses_namespace_and_period_ttl() {
        let f = fixture();
        f.store.record("test_key", 60).await;

        assert_eq!(f.backend.ttl("rate_limit:test_key"), Some(60));
    }

    #[tokio::test]
    async fn test_expired_requests_are_removed() {
        let f = fixture();
        f.store.record("test_key", 60).await;

        f.clock.advance(61.0);
        assert_eq!(f.store.count("test_key", 60).await, 0);
    }

    #[tokio::test]
    async fn test_same_instant_events_collapse() {
        let f = fixture();
        f.store.record("test_key", 60).await;
        f.store.record("test_key", 60).await;

        assert_eq!(f.store.count("test_key", 60).await, 1);
    }

    #[tokio::test]
    async fn test_count_fails_open_and_logs() {
        let f = fixture();
        f.store.record("test_key", 60).await;
        f.backend.set_failing(true);

        assert_eq!(f.store.count("test_key", 60).await, 0);
        let errors = f.sink.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("RedisStore#count error:"));
    }

    #[tokio::test]
    async fn test_record_fails_open_and_logs() {
        let f = fixture();
        f.backend.set_failing(true);

        assert_eq!(f.store.record("test_key", 60).await, 0);
        assert!(f.sink.errors.lock()[0].starts_with("RedisStore#record error:"));
    }
}
