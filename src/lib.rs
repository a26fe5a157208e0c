//! Turnstile - Sliding-Window Request Admission
//!
//! This crate decides whether an incoming request should be admitted or
//! rejected against configured quotas, and for how long a rejected caller
//! should wait. Identities are derived from the request through a
//! prioritized extraction fallback chain; per-identity counters live in a
//! pluggable store (in-process or shared Redis) and are evaluated with a
//! weighted two-window sliding counter that avoids fixed-window boundary
//! bursts.
//!
//! The crate is adapter-agnostic: frameworks feed it a [`RequestContext`]
//! and translate the returned [`RateLimitDecision`] into their own response
//! headers and status codes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turnstile::{
//!     FailurePolicy, KeyExtractionStrategy, MemoryStore, RateLimiter,
//!     RequestContext, Strategy,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> turnstile::Result<()> {
//! let limiter = RateLimiter::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .strategy(Strategy::new("short", 100, Duration::from_secs(60))?)
//!     .default_extraction(KeyExtractionStrategy::fallback(vec![
//!         KeyExtractionStrategy::header("x-api-key"),
//!         KeyExtractionStrategy::Address,
//!     ]))
//!     .failure_policy(FailurePolicy::FailClosed)
//!     .build()?;
//!
//! let ctx = RequestContext::new("203.0.113.1".parse().unwrap())
//!     .with_header("x-api-key", "alpha");
//! let decision = limiter.evaluate(&ctx).await;
//! assert!(decision.allowed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod ratelimit;
pub mod storage;

pub use config::TurnstileConfig;
pub use context::RequestContext;
pub use error::{Result, TurnstileError};
pub use extract::{KeyExtractionStrategy, KeyResolver, ParamType};
pub use ratelimit::{
    BypassRule, DecisionReason, FailurePolicy, RateLimitDecision, RateLimiter, Strategy,
};
pub use storage::{CounterStore, MemoryStore, RedisStore, RedisStoreConfig, StoreError};
