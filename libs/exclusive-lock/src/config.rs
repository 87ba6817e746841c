//! Lock options and their validation.
//!
//! [`LockOptions`] is the user-facing, deserializable shape. It is checked
//! field by field into [`LockSettings`], which is what a lease actually runs
//! with. Nothing here touches the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, FieldError};
use crate::key;

/// Default lease TTL.
pub const DEFAULT_TTL_MS: u64 = 3000;
/// Default renewal period.
pub const DEFAULT_RENEWAL_INTERVAL_MS: u64 = 1000;
/// Minimum headroom between the renewal period and the TTL.
pub const MIN_RENEWAL_GAP_MS: u64 = 500;
/// Default key-space prefix.
pub const DEFAULT_KEY_PREFIX: &str = "exclusive-lock";

/// Options for constructing an [`ExclusiveLock`].
///
/// `ttl_ms` and `renewal_interval_ms` must be given together or not at all.
///
/// [`ExclusiveLock`]: crate::ExclusiveLock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockOptions {
    /// Resource name, slugified into the key.
    pub name: String,
    /// Store-side expiry of the lock key in milliseconds.
    pub ttl_ms: Option<u64>,
    /// How often the held lock's expiry is pushed forward.
    pub renewal_interval_ms: Option<u64>,
    /// Payload stored with the claim, e.g. the holder's pod name.
    pub contents: Value,
    /// Key-space prefix, slugified into the key.
    pub key_prefix: String,
    /// Start the renewal scheduler on acquire.
    pub auto_renew: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            ttl_ms: None,
            renewal_interval_ms: None,
            contents: Value::from(1),
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            auto_renew: true,
        }
    }
}

impl LockOptions {
    /// Options for `name` with every other field defaulted.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the TTL and renewal period together.
    pub fn timing(mut self, ttl_ms: u64, renewal_interval_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self.renewal_interval_ms = Some(renewal_interval_ms);
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn renewal_interval_ms(mut self, renewal_interval_ms: u64) -> Self {
        self.renewal_interval_ms = Some(renewal_interval_ms);
        self
    }

    pub fn contents(mut self, contents: impl Into<Value>) -> Self {
        self.contents = contents.into();
        self
    }

    pub fn key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }

    /// Check every field and derive the runtime settings.
    ///
    /// Field problems are collected and reported together; the TTL spacing
    /// rule is only checked once the fields themselves are valid.
    pub fn validate(&self) -> Result<LockSettings, ConfigError> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(FieldError::new("name", "must be a non-empty string"));
        }
        if self.key_prefix.is_empty() {
            errors.push(FieldError::new("key_prefix", "must be a non-empty string"));
        }
        match (self.ttl_ms, self.renewal_interval_ms) {
            (Some(_), None) => errors.push(FieldError::new(
                "renewal_interval_ms",
                "must be present when ttl_ms is present",
            )),
            (None, Some(_)) => errors.push(FieldError::new(
                "ttl_ms",
                "must be present when renewal_interval_ms is present",
            )),
            _ => {}
        }
        if self.renewal_interval_ms == Some(0) {
            errors.push(FieldError::new(
                "renewal_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.contents.is_null() {
            errors.push(FieldError::new("contents", "must not be null"));
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation { errors });
        }

        let ttl_ms = self.ttl_ms.unwrap_or(DEFAULT_TTL_MS);
        let renewal_interval_ms = self
            .renewal_interval_ms
            .unwrap_or(DEFAULT_RENEWAL_INTERVAL_MS);
        let diff = i128::from(ttl_ms) - i128::from(renewal_interval_ms);
        if diff < i128::from(MIN_RENEWAL_GAP_MS) {
            return Err(ConfigError::TtlSpacing {
                ttl_ms,
                renewal_interval_ms,
                // only below the gap here, so bounded above
                diff: i64::try_from(diff).unwrap_or(i64::MIN),
                min_gap_ms: MIN_RENEWAL_GAP_MS,
            });
        }

        Ok(LockSettings {
            key: key::lock_key(&self.key_prefix, &self.name),
            name: key::slugify(&self.name),
            ttl: Duration::from_millis(ttl_ms),
            renewal_interval: Duration::from_millis(renewal_interval_ms),
            payload: self.contents.to_string(),
            contents: self.contents.clone(),
            auto_renew: self.auto_renew,
        })
    }
}

/// Validated, immutable lease settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    key: String,
    name: String,
    ttl: Duration,
    renewal_interval: Duration,
    contents: Value,
    payload: String,
    auto_renew: bool,
}

impl LockSettings {
    /// Store key, `<prefix>:<name>` after slugifying both.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Slugified resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn renewal_interval(&self) -> Duration {
        self.renewal_interval
    }

    pub fn contents(&self) -> &Value {
        &self.contents
    }

    /// Contents as written to the store.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn auto_renew(&self) -> bool {
        self.auto_renew
    }
}
