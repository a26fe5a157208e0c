//! Admission decision record handed back to the adapter layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Why a decision came out the way it did.
///
/// Rejections caused by a backend outage under a fail-closed policy carry
/// [`DecisionReason::BackendUnavailable`] so adapters can distinguish them
/// from genuine quota exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Admitted under quota.
    Admitted,
    /// Admitted without consuming quota (bypass rule or exempt route).
    Bypassed,
    /// Rejected: a strategy's window is full.
    QuotaExceeded,
    /// The counter store was unreachable; the configured failure policy
    /// produced this decision.
    BackendUnavailable,
}

/// The outcome of evaluating one request.
///
/// Produced fresh per request and immutable; the adapter translates it into
/// transport-level headers and a rejection status when `allowed` is false.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The binding strategy's quota.
    pub limit: u64,
    /// Requests left in the binding strategy's rolling window.
    pub remaining: u64,
    /// When the binding strategy's active window ends.
    pub reset_at: DateTime<Utc>,
    /// How long the caller should wait before retrying. Set on quota
    /// rejections, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    /// Name of the strategy that rejected the request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejecting_strategy: Option<String>,
    /// What produced this decision.
    pub reason: DecisionReason,
}

impl RateLimitDecision {
    /// An allowed decision that consumed no quota.
    pub(crate) fn bypassed(limit: u64, window: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: Utc::now() + window,
            retry_after: None,
            rejecting_strategy: None,
            reason: DecisionReason::Bypassed,
        }
    }

    /// The decision mandated by the failure policy when the store is down.
    pub(crate) fn backend_unavailable(allowed: bool, limit: u64, window: Duration) -> Self {
        Self {
            allowed,
            limit,
            remaining: if allowed { limit } else { 0 },
            reset_at: Utc::now() + window,
            retry_after: None,
            rejecting_strategy: None,
            reason: DecisionReason::BackendUnavailable,
        }
    }

    /// Render the standard rate limit response headers as plain string
    /// pairs. The adapter owns the actual transport header types.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_at.timestamp().to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            headers.push(("retry-after", retry_after.as_secs().max(1).to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_on_rejection_include_retry_after() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after: Some(Duration::from_secs(7)),
            rejecting_strategy: Some("short".to_string()),
            reason: DecisionReason::QuotaExceeded,
        };

        let headers = decision.headers();
        assert_eq!(headers[0], ("x-ratelimit-limit", "5".to_string()));
        assert_eq!(headers[1], ("x-ratelimit-remaining", "0".to_string()));
        assert!(headers
            .iter()
            .any(|(name, value)| *name == "retry-after" && value == "7"));
    }

    #[test]
    fn test_headers_on_admission_omit_retry_after() {
        let decision = RateLimitDecision::bypassed(100, Duration::from_secs(60));
        assert!(decision
            .headers()
            .iter()
            .all(|(name, _)| *name != "retry-after"));
    }

    #[test]
    fn test_subsecond_retry_after_rounds_up_to_one() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after: Some(Duration::from_millis(300)),
            rejecting_strategy: None,
            reason: DecisionReason::QuotaExceeded,
        };

        let headers = decision.headers();
        let retry = headers.iter().find(|(name, _)| *name == "retry-after");
        assert_eq!(retry.map(|(_, v)| v.as_str()), Some("1"));
    }

    #[test]
    fn test_decision_serializes_for_adapter_bodies() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after: None,
            rejecting_strategy: Some("short".to_string()),
            reason: DecisionReason::QuotaExceeded,
        };

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"], "quota_exceeded");
        assert_eq!(json["rejecting_strategy"], "short");
    }
}
