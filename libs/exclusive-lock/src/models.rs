//! Lock events, inspection results, and decoding of stored contents.

use std::time::Duration;

use serde_json::Value;
use tracing::error;

use crate::error::LockError;

/// Capacity of the per-lock event channel. Slow subscribers lag rather than
/// block the lock.
pub const EVENT_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// State transition notification published by a lock.
#[derive(Debug, Clone)]
pub enum LockEvent {
    /// The lock was claimed by this instance.
    Acquired { key: String },
    /// The key's expiry was pushed forward by `ttl`.
    Renewed { key: String, ttl: Duration },
    /// A renewal failed; the lock is abdicating.
    RenewalFailed { key: String, error: LockError },
    /// The lock was given up and the key deleted.
    Released { key: String },
    /// The lock was given up locally but deleting the key failed. The key may
    /// remain until it expires.
    ReleaseFailed { key: String, error: LockError },
}

impl LockEvent {
    /// The key this event refers to.
    pub fn key(&self) -> &str {
        match self {
            LockEvent::Acquired { key }
            | LockEvent::Renewed { key, .. }
            | LockEvent::RenewalFailed { key, .. }
            | LockEvent::Released { key }
            | LockEvent::ReleaseFailed { key, .. } => key,
        }
    }

    /// Short event name, suitable as a log or metric label.
    pub fn name(&self) -> &'static str {
        match self {
            LockEvent::Acquired { .. } => "acquired",
            LockEvent::Renewed { .. } => "renewed",
            LockEvent::RenewalFailed { .. } => "renewal-failed",
            LockEvent::Released { .. } => "released",
            LockEvent::ReleaseFailed { .. } => "release-failed",
        }
    }

    /// The error carried by failure events.
    pub fn error(&self) -> Option<&LockError> {
        match self {
            LockEvent::RenewalFailed { error, .. } | LockEvent::ReleaseFailed { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Stored lock contents as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum LockContents {
    /// Decoded payload.
    Json(Value),
    /// Payload that could not be decoded, returned as stored.
    Raw(String),
}

impl LockContents {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            LockContents::Json(value) => Some(value),
            LockContents::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, LockContents::Raw(_))
    }
}

/// Diagnostic view of a held lock's record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockInspection {
    /// Stored contents, absent if the key is gone.
    pub contents: Option<LockContents>,
    /// Remaining time before the store expires the key.
    pub remaining_ttl: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Decode stored contents. Corrupt payloads are returned raw so that a broken
/// record can still be inspected.
pub fn decode(key: &str, raw: String) -> LockContents {
    match serde_json::from_str(&raw) {
        Ok(value) => LockContents::Json(value),
        Err(err) => {
            error!(%err, key, "lock contents are corrupt");
            LockContents::Raw(raw)
        }
    }
}
