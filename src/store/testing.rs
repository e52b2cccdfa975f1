//! In-memory stand-ins for remote connection handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BackendError, CacheConnection, SortedSetConnection};

fn unavailable() -> BackendError {
    BackendError::Unavailable("connection refused".to_string())
}

/// Sorted sets kept in a map, with switchable failure.
#[derive(Default)]
pub(crate) struct FakeSortedSet {
    sets: Mutex<HashMap<String, Vec<f64>>>,
    ttls: Mutex<HashMap<String, u64>>,
    failing: AtomicBool,
}

impl FakeSortedSet {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn ttl(&self, key: &str) -> Option<u64> {
        self.ttls.lock().get(key).copied()
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SortedSetConnection for FakeSortedSet {
    async fn trim_and_count(&self, key: &str, stale_at: f64) -> Result<u64, BackendError> {
        self.check()?;
        let mut sets = self.sets.lock();
        let members = sets.entry(key.to_string()).or_default();
        members.retain(|&score| score > stale_at);
        Ok(members.len() as u64)
    }

    async fn add_and_count(
        &self,
        key: &str,
        now: f64,
        stale_at: f64,
        ttl_secs: u64,
    ) -> Result<u64, BackendError> {
        self.check()?;
        let mut sets = self.sets.lock();
        let members = sets.entry(key.to_string()).or_default();
        members.retain(|&score| score > stale_at);
        if !members.contains(&now) {
            members.push(now);
        }
        self.ttls.lock().insert(key.to_string(), ttl_secs);
        Ok(members.len() as u64)
    }
}

/// Key-value cache kept in a map, with switchable failure.
#[derive(Default)]
pub(crate) struct FakeCache {
    entries: Mutex<HashMap<String, (String, u64)>>,
    failing: AtomicBool,
}

impl FakeCache {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|(value, _)| value.clone())
    }

    pub(crate) fn ttl(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|(_, ttl)| *ttl)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheConnection for FakeCache {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), BackendError> {
        self.check()?;
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), ttl_secs));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }
}
