//! # exclusive-lock
//!
//! A distributed mutual-exclusion lease on top of any key-value store that
//! offers atomic "set if absent" with millisecond expiry.
//!
//! Independent processes build an [`ExclusiveLock`] for the same resource
//! name against a shared store. The first conditional write wins; the winner
//! keeps the key alive with a background renewal task, and gives the lock up
//! the moment a renewal fails. Nothing but the store coordinates the
//! processes.
//!
//! This library provides:
//! - **[`LeaseStore`]**, the four store operations a lock needs.
//! - **[`ExclusiveLock`]** with acquire/renew/release/inspect and a broadcast
//!   channel of [`LockEvent`]s.
//! - **[`LockOptions`]** with field-by-field validation.
//! - **[`MemoryStore`]**, an in-process store with tokio-clock expiry, and a
//!   Redis-backed store behind the `redis` feature.
//!
//! ## Limits
//!
//! This is not a consensus protocol: there are no fencing tokens and no
//! clock-skew compensation. Exclusivity holds only as long as the store is
//! linearizable for conditional writes and expiry, and the TTL outlasts the
//! protected work plus scheduling and network jitter.
//!
//! ```no_run
//! use exclusive_lock::{ExclusiveLock, LockOptions, MemoryStore};
//!
//! # async fn run() -> exclusive_lock::LockResult<()> {
//! let store = MemoryStore::new();
//! let lock = ExclusiveLock::new(&LockOptions::new("nightly report"), store.clone())?;
//! if lock.acquire().await? {
//!     // protected work
//!     lock.release().await?;
//! }
//! # Ok(())
//! # }
//! ```
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod key;
pub mod lease;
pub mod memory;
pub mod models;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

// Re-export key types for convenient access
pub use config::{LockOptions, LockSettings};
pub use error::{ConfigError, FieldError, LockError, LockResult, StoreOp};
pub use lease::{ExclusiveLock, RenewOutcome};
pub use memory::MemoryStore;
pub use models::{LockContents, LockEvent, LockInspection};
pub use store::{LeaseStore, StoredLease};

#[cfg(feature = "redis")]
pub use redis_store::{RedisStore, RedisStoreError};
