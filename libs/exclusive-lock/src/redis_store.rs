//! [`LeaseStore`] backed by a Redis-compatible server.
//!
//! Commands used: `SET key value PX ttl NX` to claim, `PEXPIRE` to renew,
//! `DEL` to release, and a `MULTI`/`EXEC` of `GET` + `PTTL` to inspect. The
//! connection manager reconnects on its own; every call clones the cheap
//! handle.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Value, cmd, from_redis_value, pipe};
use thiserror::Error;
use tracing::{debug, info};

use crate::store::{LeaseStore, StoredLease};

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
    /// `PEXPIRE` reported that the key no longer exists.
    #[error("key does not exist: {0}")]
    KeyMissing(String),
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self, RedisStoreError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(url, "connected to redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Turn the `GET`/`PTTL` replies into a record. Each reply is read on its own,
/// an empty reply set means the transaction returned nothing.
fn parse_batch(replies: Vec<Value>) -> Option<StoredLease> {
    if replies.is_empty() {
        return None;
    }
    let mut replies = replies.into_iter();
    let value = replies
        .next()
        .and_then(|v| from_redis_value::<Option<String>>(&v).ok())
        .flatten();
    // -2: no key, -1: no expiry
    let remaining_ttl = replies
        .next()
        .and_then(|v| from_redis_value::<i64>(&v).ok())
        .and_then(|ms| u64::try_from(ms).ok())
        .map(Duration::from_millis);
    Some(StoredLease {
        value,
        remaining_ttl,
    })
}

#[async_trait]
impl LeaseStore for RedisStore {
    type Error = RedisStoreError;

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        let mut conn = self.conn.clone();
        // OK when set, nil when the key already exists
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn reset_expiry(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        let updated: i64 = cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        if updated == 0 {
            return Err(RedisStoreError::KeyMissing(key.to_owned()));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        let removed: i64 = cmd("DEL").arg(key).query_async(&mut conn).await?;
        debug!(key, removed, "redis DEL");
        Ok(())
    }

    async fn batch_read(&self, key: &str) -> Result<Option<StoredLease>, Self::Error> {
        let mut conn = self.conn.clone();
        let replies: Vec<Value> = pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(parse_batch(replies))
    }
}
