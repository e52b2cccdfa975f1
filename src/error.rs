//! Error types for Quotakeeper.

use thiserror::Error;

use crate::ratelimit::Evaluation;

/// Main error type for Quotakeeper operations.
///
/// Configuration mistakes (`Config`, `InvalidArgument`, `Store`) are always
/// surfaced to the caller. `RateLimitExceeded` is the expected control-flow
/// signal for a spent quota. Backend I/O failures never appear here: the
/// stores absorb them and fail open.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Configuration-related errors, including missing connection handles
    #[error("Configuration error: {0}")]
    Config(String),

    /// An invalid limit, period or key
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown or unusable store backend
    #[error("Store error: {0}")]
    Store(String),

    /// The quota for a key is spent; carries the quota metadata of the rejection
    #[error("Rate limit exceeded: limit {} per {} seconds", .0.limit, .0.period)]
    RateLimitExceeded(Box<Evaluation>),
}

impl QuotaError {
    /// Whether this error is the quota-exceeded signal rather than a misconfiguration.
    pub fn is_exceeded(&self) -> bool {
        matches!(self, QuotaError::RateLimitExceeded(_))
    }
}

/// Result type alias for Quotakeeper operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
