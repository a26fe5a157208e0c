//! Error types for the Turnstile admission engine.

use thiserror::Error;

use crate::storage::StoreError;

/// Main error type for Turnstile operations.
///
/// Only configuration-time failures escape the crate: once a
/// [`RateLimiter`](crate::RateLimiter) is built, every runtime fault is
/// absorbed into a [`RateLimitDecision`](crate::RateLimitDecision).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// A strategy was registered with a non-positive window or quota.
    #[error("invalid strategy {name:?}: {reason}")]
    InvalidStrategyConfig { name: String, reason: String },

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Counter store errors (connect/setup time)
    #[error("counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
