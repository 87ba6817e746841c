//! The coordination-store capability a lease depends on.

use std::time::Duration;

use async_trait::async_trait;

/// Result of a batched read of a lock key.
///
/// Either half may be absent on its own: the key may have vanished between
/// the two reads, or the store may not report an expiry for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredLease {
    /// Raw stored value.
    pub value: Option<String>,
    /// Time left before the store expires the key.
    pub remaining_ttl: Option<Duration>,
}

/// Key-value store with atomic conditional writes and millisecond expiry.
///
/// Implementations must be safe to share between any number of leases and
/// are expected to be cheap handles (`Clone` over shared connection state).
/// Exclusivity rests entirely on [`set_if_absent`] being atomic.
///
/// [`set_if_absent`]: LeaseStore::set_if_absent
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    // send/sync/static required for async trait bounds
    type Error: std::error::Error + Send + Sync + 'static;

    /// Set `key` to `value` with expiry `ttl`, only if `key` does not exist.
    /// Returns true iff this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, Self::Error>;

    /// Push the expiry of an existing key to `ttl` from now. Must fail if the
    /// key is absent.
    async fn reset_expiry(&self, key: &str, ttl: Duration) -> Result<(), Self::Error>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Self::Error>;

    /// Read value and remaining TTL in one round trip. `None` when the store
    /// returned nothing usable for the whole batch.
    async fn batch_read(&self, key: &str) -> Result<Option<StoredLease>, Self::Error>;
}
