//! Backend resolution.
//!
//! The registry is the explicit, process-wide owner of the in-memory store
//! and of the connection handles for the remote backends. Create one at
//! startup, share it behind an `Arc`, and resolve stores from it by name.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    connect_cache, CacheConnection, CounterStore, MemcachedStore, MemoryStore,
    RedisSortedSetConnection, RedisStore, SortedSetConnection, StoreKind,
};
use crate::clock::{Clock, SystemClock};
use crate::config::QuotaConfig;
use crate::error::{QuotaError, Result};
use crate::monitor::Monitor;

/// Maps backend names to counter stores.
pub struct StoreRegistry {
    memory: Arc<MemoryStore>,
    sorted_set: Option<Arc<dyn SortedSetConnection>>,
    cache: Option<Arc<dyn CacheConnection>>,
    default_store: StoreKind,
    clock: Arc<dyn Clock>,
    monitor: Monitor,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("default_store", &self.default_store)
            .field("sorted_set", &self.sorted_set.is_some())
            .field("cache", &self.cache.is_some())
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl StoreRegistry {
    /// A registry with only the in-memory backend, on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// A registry with only the in-memory backend, reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: Arc::new(MemoryStore::with_clock(clock.clone())),
            sorted_set: None,
            cache: None,
            default_store: StoreKind::Memory,
            clock,
            monitor: Monitor::disabled(),
        }
    }

    /// Open every connection named in `config` and build a registry around them.
    pub async fn connect(config: &QuotaConfig) -> Result<Self> {
        let mut registry = Self::new().with_default_store(config.default_store);

        if config.logging.monitor {
            registry = registry.with_monitor(Monitor::tracing());
        }

        if let Some(redis) = &config.redis {
            let connection = RedisSortedSetConnection::connect(&redis.url)
                .await
                .map_err(|e| QuotaError::Config(format!("Failed to connect to Redis: {}", e)))?;
            registry = registry.with_sorted_set_connection(Arc::new(connection));
        }

        if let Some(memcached) = &config.memcached {
            let connection = connect_cache(&memcached.url)
                .await
                .map_err(|e| QuotaError::Config(format!("Failed to connect to cache: {}", e)))?;
            registry = registry.with_cache_connection(connection);
        }

        info!(
            default_store = %registry.default_store,
            redis = registry.sorted_set.is_some(),
            memcached = registry.cache.is_some(),
            "Store registry initialized"
        );
        Ok(registry)
    }

    pub fn with_default_store(mut self, kind: StoreKind) -> Self {
        self.default_store = kind;
        self
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_sorted_set_connection(mut self, connection: Arc<dyn SortedSetConnection>) -> Self {
        self.sorted_set = Some(connection);
        self
    }

    pub fn with_cache_connection(mut self, connection: Arc<dyn CacheConnection>) -> Self {
        self.cache = Some(connection);
        self
    }

    pub fn default_store(&self) -> StoreKind {
        self.default_store
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The shared in-memory store.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Wipe the in-memory store.
    ///
    /// This is primarily useful for testing.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Resolve a backend by kind.
    ///
    /// The in-memory store is shared; remote stores are built fresh around
    /// the configured connection handle, which must be present.
    pub fn resolve(&self, kind: StoreKind) -> Result<Arc<dyn CounterStore>> {
        debug!(store = %kind, "Resolving counter store");
        match kind {
            StoreKind::Memory => Ok(self.memory.clone()),
            StoreKind::Redis => {
                let connection = self
                    .sorted_set
                    .clone()
                    .ok_or_else(|| {
                        QuotaError::Config("Redis connection not configured".to_string())
                    })?;
                Ok(Arc::new(RedisStore::new(
                    connection,
                    self.clock.clone(),
                    self.monitor.clone(),
                )))
            }
            StoreKind::Memcached => {
                let connection = self.cache.clone().ok_or_else(|| {
                    QuotaError::Config("Memcached connection not configured".to_string())
                })?;
                Ok(Arc::new(MemcachedStore::new(
                    connection,
                    self.clock.clone(),
                    self.monitor.clone(),
                )))
            }
        }
    }

    /// Resolve a backend by symbolic name.
    pub fn resolve_named(&self, name: &str) -> Result<Arc<dyn CounterStore>> {
        self.resolve(name.parse()?)
    }

    /// Resolve the configured default backend.
    pub fn resolve_default(&self) -> Result<Arc<dyn CounterStore>> {
        self.resolve(self.default_store)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
