//! Counter stores: where window records live.
//!
//! A store owns every [`WindowRecord`](crate::ratelimit::window::WindowState)
//! outright — the engine never caches one across calls — and must execute
//! the roll/estimate/increment sequence as a single atomic unit per key.
//! Records expire on their own after two idle windows; no sweeper is
//! required.

mod memory;
mod redis;

pub use self::redis::{RedisStore, RedisStoreConfig};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::window::WindowSnapshot;

/// Store-level failures. At evaluation time these never escape the decision
/// service; the configured failure policy turns them into decisions.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store is unreachable or refused the operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within the configured bound.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Atomic per-key window counter storage.
///
/// Implementations must not expose a window where two concurrent callers
/// both observe a pre-increment count and both increment — the
/// read-check-increment sequence is atomic per key. For stores that cannot
/// guarantee this, concurrent overrun is bounded by the number of in-flight
/// requests at the moment of the race; both stores shipped here are atomic.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Roll the key's window if due, estimate the rolling rate, and admit
    /// (incrementing the current count) if the estimate is under `limit`.
    /// Resets the record's TTL to `2 * window`.
    async fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError>;

    /// The same estimate without incrementing, creating, or refreshing
    /// anything.
    async fn current_usage(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Drop the key's record. Admin and test use.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}
