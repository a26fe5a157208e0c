//! Admission engine: drives the counter store and assembles decisions.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, trace};

use super::decision::{DecisionReason, RateLimitDecision};
use super::strategy::Strategy;
use super::window::WindowSnapshot;
use crate::storage::{CounterStore, StoreError};

/// Checks one (key, strategy) pair against the store.
///
/// The engine owns no window state: every call reads and writes through the
/// store's atomic operation, and the decision's numeric fields are derived
/// from that single snapshot.
#[derive(Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn CounterStore>,
}

impl AdmissionEngine {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Namespace the resolved identity per strategy so each strategy keeps
    /// an independent window for the same caller.
    fn storage_key(key: &str, strategy: &Strategy) -> String {
        format!("{}:{}", key, strategy.name())
    }

    /// Check-and-increment: admit if the strategy's rolling window has room,
    /// consuming quota on admission only.
    pub async fn check_and_increment(
        &self,
        key: &str,
        strategy: &Strategy,
    ) -> Result<RateLimitDecision, StoreError> {
        let storage_key = Self::storage_key(key, strategy);
        trace!(
            key = %storage_key,
            limit = strategy.max_requests(),
            "checking rate limit"
        );

        let snapshot = self
            .store
            .check_and_increment(&storage_key, strategy.window(), strategy.max_requests())
            .await?;

        if !snapshot.admitted {
            debug!(
                key = %storage_key,
                estimated = snapshot.estimated(),
                limit = strategy.max_requests(),
                "rate limit exceeded"
            );
        }

        Ok(self.decision(strategy, snapshot))
    }

    /// Current usage for a (key, strategy) pair without consuming quota.
    pub async fn current_usage(
        &self,
        key: &str,
        strategy: &Strategy,
    ) -> Result<RateLimitDecision, StoreError> {
        let storage_key = Self::storage_key(key, strategy);
        let snapshot = self
            .store
            .current_usage(&storage_key, strategy.window(), strategy.max_requests())
            .await?;

        Ok(self.decision(strategy, snapshot))
    }

    fn decision(&self, strategy: &Strategy, snapshot: WindowSnapshot) -> RateLimitDecision {
        let limit = strategy.max_requests();
        let allowed = snapshot.admitted;

        RateLimitDecision {
            allowed,
            limit,
            remaining: snapshot.remaining(limit),
            reset_at: Utc::now() + snapshot.reset_after(),
            retry_after: (!allowed).then(|| snapshot.retry_after(limit)),
            rejecting_strategy: (!allowed).then(|| strategy.name().to_string()),
            reason: if allowed {
                DecisionReason::Admitted
            } else {
                DecisionReason::QuotaExceeded
            },
        }
    }
}
