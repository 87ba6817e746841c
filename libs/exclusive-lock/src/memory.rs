//! In-process [`LeaseStore`] with store-side expiry.
//!
//! Expiry follows the tokio clock, so tests running with a paused runtime
//! can advance time deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::store::{LeaseStore, StoredLease};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("key does not exist in memory store: {0}")]
    KeyMissing(String),
}

/// Expiry instant for `ttl` from now. A ttl too large to represent never
/// expires.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live<'a>(map: &'a mut HashMap<String, MemoryEntry>, key: &str) -> Option<&'a mut MemoryEntry> {
        let now = Instant::now();
        if map.get(key).is_some_and(|entry| !entry.is_live(now)) {
            trace!(key, "expiring memory store entry");
            map.remove(key);
        }
        map.get_mut(key)
    }

    /// Current value of `key`, if it has not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        Self::live(&mut guard, key).map(|entry| entry.value.clone())
    }

    /// Time left before `key` expires. `None` if the key is absent or has no
    /// expiry.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        let now = Instant::now();
        Self::live(&mut guard, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Unconditionally overwrite `key`, replacing any expiry with `ttl`.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        guard.insert(
            key.to_owned(),
            MemoryEntry {
                value: value.to_owned(),
                expires_at: ttl.and_then(deadline),
            },
        );
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("memory store lock poisoned");
        let now = Instant::now();
        guard.values().filter(|entry| entry.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    type Error = MemoryError;

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        if Self::live(&mut guard, key).is_some() {
            return Ok(false);
        }
        guard.insert(
            key.to_owned(),
            MemoryEntry {
                value: value.to_owned(),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn reset_expiry(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        match Self::live(&mut guard, key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl);
                Ok(())
            }
            None => Err(MemoryError::KeyMissing(key.to_owned())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        guard.remove(key);
        Ok(())
    }

    async fn batch_read(&self, key: &str) -> Result<Option<StoredLease>, Self::Error> {
        let mut guard = self.inner.lock().expect("memory store lock poisoned");
        let now = Instant::now();
        Ok(Some(match Self::live(&mut guard, key) {
            Some(entry) => StoredLease {
                value: Some(entry.value.clone()),
                remaining_ttl: entry
                    .expires_at
                    .map(|at| at.saturating_duration_since(now)),
            },
            None => StoredLease::default(),
        }))
    }
}
