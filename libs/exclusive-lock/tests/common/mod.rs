//! Shared helpers for lock integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exclusive_lock::memory::MemoryError;
use exclusive_lock::{LeaseStore, MemoryStore, StoredLease};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Error)]
pub enum FlakyError {
    #[error("injected {0} failure")]
    Injected(&'static str),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// A [`MemoryStore`] that can be told to fail, return empty batches, or hold
/// renewals until the test lets them through. Counts every call.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    memory: MemoryStore,
    fail_set: AtomicBool,
    fail_reset: AtomicBool,
    fail_delete: AtomicBool,
    null_batch: AtomicBool,
    gate_reset: AtomicBool,
    gate: Semaphore,
    reset_entered: Notify,
    set_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                memory: MemoryStore::new(),
                fail_set: AtomicBool::new(false),
                fail_reset: AtomicBool::new(false),
                fail_delete: AtomicBool::new(false),
                null_batch: AtomicBool::new(false),
                gate_reset: AtomicBool::new(false),
                gate: Semaphore::new(0),
                reset_entered: Notify::new(),
                set_calls: AtomicUsize::new(0),
                reset_calls: AtomicUsize::new(0),
                delete_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    pub fn fail_set(&self, fail: bool) {
        self.inner.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reset(&self, fail: bool) {
        self.inner.fail_reset.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.inner.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn null_batch(&self, null: bool) {
        self.inner.null_batch.store(null, Ordering::SeqCst);
    }

    /// Hold every `reset_expiry` until [`FlakyStore::open_gate`] hands out a
    /// permit.
    pub fn gate_reset(&self) {
        self.inner.gate_reset.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self, permits: usize) {
        self.inner.gate.add_permits(permits);
    }

    /// Stop holding renewals and let the one waiting through.
    pub fn ungate(&self) {
        self.inner.gate_reset.store(false, Ordering::SeqCst);
        self.inner.gate.add_permits(1);
    }

    /// Resolves once a `reset_expiry` call has reached the store.
    pub async fn reset_entered(&self) {
        self.inner.reset_entered.notified().await;
    }

    pub fn set_calls(&self) -> usize {
        self.inner.set_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.inner.reset_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.inner.delete_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.inner.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    type Error = FlakyError;

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        self.inner.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_set.load(Ordering::SeqCst) {
            return Err(FlakyError::Injected("set_if_absent"));
        }
        Ok(self.inner.memory.set_if_absent(key, value, ttl).await?)
    }

    async fn reset_expiry(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        self.inner.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.gate_reset.load(Ordering::SeqCst) {
            self.inner.reset_entered.notify_one();
            let permit = self
                .inner
                .gate
                .acquire()
                .await
                .expect("gate semaphore closed");
            permit.forget();
        }
        if self.inner.fail_reset.load(Ordering::SeqCst) {
            return Err(FlakyError::Injected("reset_expiry"));
        }
        Ok(self.inner.memory.reset_expiry(key, ttl).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        self.inner.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_delete.load(Ordering::SeqCst) {
            return Err(FlakyError::Injected("delete"));
        }
        Ok(self.inner.memory.delete(key).await?)
    }

    async fn batch_read(&self, key: &str) -> Result<Option<StoredLease>, Self::Error> {
        self.inner.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.null_batch.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.inner.memory.batch_read(key).await?)
    }
}
