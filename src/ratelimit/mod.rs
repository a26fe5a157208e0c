//! Rate limiting logic and decision rendering.

mod bypass;
mod decision;
mod engine;
mod service;
mod strategy;
pub mod window;

pub use bypass::{BypassPredicate, BypassRule};
pub use decision::{DecisionReason, RateLimitDecision};
pub use engine::AdmissionEngine;
pub use service::{FailurePolicy, RateLimiter, RateLimiterBuilder, RouteOverride};
pub use strategy::Strategy;
