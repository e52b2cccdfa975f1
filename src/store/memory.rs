//! In-process counter store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{namespaced_key, window_start, Consistency, CounterStore, StoreKind};
use crate::clock::{Clock, SystemClock};

/// Counter store backed by a process-local map.
///
/// One mutex guards every key. Each `count` or `record` call runs in a single
/// critical section, so a call on its own is atomic; the limiter's separate
/// count and record calls are not.
pub struct MemoryStore {
    /// Namespaced key -> event timestamps, oldest first
    events: Mutex<HashMap<String, Vec<f64>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drop every tracked key.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of keys currently holding at least one event.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop timestamps older than `min_time`, removing the key once it is empty.
    fn evict_stale(events: &mut HashMap<String, Vec<f64>>, key: &str, min_time: f64) {
        if let Some(timestamps) = events.get_mut(key) {
            timestamps.retain(|&ts| ts >= min_time);
            if timestamps.is_empty() {
                events.remove(key);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    fn consistency(&self) -> Consistency {
        Consistency::Atomic
    }

    async fn count(&self, key: &str, period: u64) -> u64 {
        let key = namespaced_key(key);
        let min_time = window_start(self.clock.now(), period);

        let mut events = self.events.lock();
        Self::evict_stale(&mut events, &key, min_time);
        let count = events.get(&key).map_or(0, |timestamps| timestamps.len() as u64);

        trace!(key = %key, count, "Counted in-memory events");
        count
    }

    async fn record(&self, key: &str, period: u64) -> u64 {
        let key = namespaced_key(key);
        let now = self.clock.now();
        let min_time = window_start(now, period);

        let mut events = self.events.lock();
        Self::evict_stale(&mut events, &key, min_time);
        let timestamps = events.entry(key).or_default();
        timestamps.push(now);
        timestamps.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(1_700_000_000.0);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_record_returns_running_count() {
        let (store, _clock) = store_with_clock();

        assert_eq!(store.record("k", 60).await, 1);
        assert_eq!(store.record("k", 60).await, 2);
        assert_eq!(store.record("k", 60).await, 3);
        assert_eq!(store.count("k", 60).await, 3);
    }

    #[tokio::test]
    async fn test_count_does_not_change_stored_count() {
        let (store, _clock) = store_with_clock();
        store.record("k", 60).await;
        store.record("k", 60).await;

        for _ in 0..5 {
            assert_eq!(store.count("k", 60).await, 2);
        }
    }

    #[tokio::test]
    async fn test_stale_events_expire() {
        let (store, clock) = store_with_clock();
        store.record("k", 60).await;
        clock.advance(30.0);
        store.record("k", 60).await;

        clock.advance(31.0);
        assert_eq!(store.count("k", 60).await, 1);

        clock.advance(30.0);
        assert_eq!(store.count("k", 60).await, 0);
    }

    #[tokio::test]
    async fn test_event_exactly_at_window_edge_is_kept() {
        let (store, clock) = store_with_clock();
        store.record("k", 10).await;

        clock.advance(10.0);
        assert_eq!(store.count("k", 10).await, 1);
    }

    #[tokio::test]
    async fn test_empty_keys_are_removed() {
        let (store, clock) = store_with_clock();
        store.record("a", 10).await;
        store.record("b", 10).await;
        assert_eq!(store.len(), 2);

        clock.advance(11.0);
        store.count("a", 10).await;
        assert_eq!(store.len(), 1);

        store.count("b", 10).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (store, _clock) = store_with_clock();
        store.record("a", 60).await;
        store.record("a", 60).await;

        assert_eq!(store.count("b", 60).await, 0);
        assert_eq!(store.record("b", 60).await, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _clock) = store_with_clock();
        store.record("a", 60).await;
        store.record("b", 60).await;

        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.count("a", 60).await, 0);
    }

    #[test]
    fn test_reports_atomic_calls() {
        let store = MemoryStore::new();
        assert_eq!(store.kind(), StoreKind::Memory);
        assert_eq!(store.consistency(), Consistency::Atomic);
    }
}
