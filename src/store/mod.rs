//! Counter stores holding per-key event timestamps.
//!
//! Every backend implements [`CounterStore`]. A store owns the namespace
//! prefix, evicts stale timestamps lazily on each read or write touching a
//! key, and never surfaces backend I/O failures: on error it reports through
//! the [`Monitor`](crate::monitor::Monitor) and returns 0.

mod memcached;
mod memory;
mod redis_store;
mod registry;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::QuotaError;

pub use memcached::{
    connect_cache, CacheConnection, MemcacheConnection, MemcachedStore, RedisCacheConnection,
};
pub use memory::MemoryStore;
pub use redis_store::{RedisSortedSetConnection, RedisStore, SortedSetConnection};
pub use registry::StoreRegistry;

/// Prefix applied to every caller key before it reaches storage.
pub const NAMESPACE: &str = "rate_limit:";

/// Build the storage key for a caller key.
pub fn namespaced_key(key: &str) -> String {
    format!("{}{}", NAMESPACE, key)
}

/// Oldest timestamp still inside a window of `period` seconds ending at `now`.
pub(crate) fn window_start(now: f64, period: u64) -> f64 {
    now - period as f64
}

/// Symbolic backend names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Redis,
    Memcached,
}

impl StoreKind {
    pub const ALL: [StoreKind; 3] = [StoreKind::Memory, StoreKind::Redis, StoreKind::Memcached];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Redis => "redis",
            StoreKind::Memcached => "memcached",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = QuotaError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis),
            "memcached" => Ok(StoreKind::Memcached),
            _ => Err(QuotaError::Store(format!("Unsupported store: {}", name))),
        }
    }
}

/// Atomicity a backend gives to a single `count` or `record` call.
///
/// No backend makes the limiter's count-then-record sequence atomic; this
/// only describes each call on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// The call reads and updates the key as one indivisible step.
    Atomic,
    /// Read-modify-write with no server-side guard; concurrent writers can lose updates.
    BestEffort,
}

/// Failure talking to a remote backend. Never leaves a store.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("memcached: {0}")]
    Memcache(#[from] memcache::MemcacheError),

    #[error("malformed stored value: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Timestamp bookkeeping for rate-limited keys.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> StoreKind;

    /// Atomicity of a single `count`/`record` call on this backend.
    fn consistency(&self) -> Consistency;

    /// Number of events for `key` within the trailing `period` seconds.
    ///
    /// Evicts stale events as a side effect. Returns 0 on backend failure.
    async fn count(&self, key: &str, period: u64) -> u64;

    /// Record one event at "now" and return the resulting count.
    ///
    /// Evicts stale events first and refreshes the key's expiry to `period`.
    /// Returns 0 on backend failure, in which case the event may or may not
    /// have been persisted.
    async fn record(&self, key: &str, period: u64) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        assert_eq!(namespaced_key("user:42"), "rate_limit:user:42");
    }

    #[test]
    fn test_store_kind_from_str() {
        assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!("redis".parse::<StoreKind>().unwrap(), StoreKind::Redis);
        assert_eq!("memcached".parse::<StoreKind>().unwrap(), StoreKind::Memcached);
    }

    #[test]
    fn test_store_kind_unknown_name() {
        let err = "unsupported".parse::<StoreKind>().unwrap_err();
        assert!(matches!(err, QuotaError::Store(_)));
        assert_eq!(err.to_string(), "Store error: Unsupported store: unsupported");
    }

    #[test]
    fn test_store_kind_names_are_exact() {
        for name in ["Redis", " memory", "memcached ", "MEMCACHED"] {
            let err = name.parse::<StoreKind>().unwrap_err();
            assert!(matches!(err, QuotaError::Store(_)), "{:?}", name);
        }
    }

    #[test]
    fn test_store_kind_display_round_trips() {
        for kind in StoreKind::ALL {
            assert_eq!(kind.to_string().parse::<StoreKind>().unwrap(), kind);
        }
    }
}
