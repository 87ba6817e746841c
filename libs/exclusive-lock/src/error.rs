//! Error types for lock construction and lease operations.
//!
//! Configuration problems are reported before any store access and carry
//! per-field detail. Store failures keep their source so callers can decide
//! how to treat an indeterminate claim.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Stable code for invalid input (construction-time failures).
pub const EINVAL: &str = "EINVAL";
/// Stable code for store/transport failures.
pub const ESTORE: &str = "ESTORE";

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Option name the message refers to.
    pub field: &'static str,
    /// Human readable reason.
    pub message: String,
}

impl FieldError {
    pub(crate) fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Construction-time configuration error. Never reaches the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// One or more options are missing or malformed.
    #[error("input validation failed: {}", join_fields(.errors))]
    Validation { errors: Vec<FieldError> },

    /// The renewal interval leaves too little headroom before expiry.
    #[error(
        "renewal_interval_ms must be at least {min_gap_ms}ms less than ttl_ms \
         (ttl_ms={ttl_ms}, renewal_interval_ms={renewal_interval_ms}, diff={diff})"
    )]
    TtlSpacing {
        ttl_ms: u64,
        renewal_interval_ms: u64,
        diff: i64,
        min_gap_ms: u64,
    },
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    /// Per-field messages. Empty for a spacing violation.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::Validation { errors } => errors,
            ConfigError::TtlSpacing { .. } => &[],
        }
    }

    /// Returns true for the TTL/interval range violation.
    pub fn is_range_violation(&self) -> bool {
        matches!(self, ConfigError::TtlSpacing { .. })
    }
}

/// Top-level error type for lease operations.
///
/// Cheap to clone so the same failure can be returned to the caller and
/// published as an event.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Invalid options.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The coordination store failed or could not be reached.
    #[error("store error during {op} of '{key}': {source}")]
    Store {
        op: StoreOp,
        key: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Store operation a [`LockError::Store`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    SetIfAbsent,
    ResetExpiry,
    Delete,
    BatchRead,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::SetIfAbsent => write!(f, "set_if_absent"),
            StoreOp::ResetExpiry => write!(f, "reset_expiry"),
            StoreOp::Delete => write!(f, "delete"),
            StoreOp::BatchRead => write!(f, "batch_read"),
        }
    }
}

impl LockError {
    pub(crate) fn store<E>(op: StoreOp, key: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LockError::Store {
            op,
            key: key.to_owned(),
            source: Arc::new(source),
        }
    }

    /// Stable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            LockError::Config(_) => EINVAL,
            LockError::Store { .. } => ESTORE,
        }
    }

    /// Returns true if this error came from option validation.
    pub fn is_config(&self) -> bool {
        matches!(self, LockError::Config(_))
    }

    /// Returns true if the store failed. During acquire this means the claim
    /// outcome is unknown.
    pub fn is_store(&self) -> bool {
        matches!(self, LockError::Store { .. })
    }

    /// The store operation that failed, if any.
    pub fn store_op(&self) -> Option<StoreOp> {
        match self {
            LockError::Store { op, .. } => Some(*op),
            LockError::Config(_) => None,
        }
    }
}

/// Shorthand result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;
