//! The rate limit decision service.
//!
//! Orchestrates bypass evaluation, key resolution, and conjunctive
//! multi-strategy admission into a single decision per request. Everything
//! below this boundary is absorbed: `evaluate` never fails, it decides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::bypass::BypassRule;
use super::decision::RateLimitDecision;
use super::engine::AdmissionEngine;
use super::strategy::Strategy;
use crate::context::RequestContext;
use crate::error::{Result, TurnstileError};
use crate::extract::{KeyExtractionStrategy, KeyResolver};
use crate::storage::CounterStore;

/// What to do when the counter store is unreachable.
///
/// This is an availability/security tradeoff and intentionally has no
/// default: the builder and the config format both require it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Admit everything while the store is down.
    FailOpen,
    /// Reject everything while the store is down.
    FailClosed,
}

/// Per-route overrides, consulted by route identifier.
///
/// Routes replace decorator-style per-handler configuration: the adapter
/// registers a route name, and any request carrying that name picks up the
/// override.
#[derive(Debug, Default, Clone)]
pub struct RouteOverride {
    /// Strategies evaluated for this route instead of the service-wide list.
    pub strategies: Option<Vec<Strategy>>,
    /// Key extraction override; beats the service-wide default.
    pub extraction: Option<KeyExtractionStrategy>,
    /// Exempt the route from rate limiting entirely.
    pub exempt: bool,
}

/// The decision service: one per process, shared across callers.
pub struct RateLimiter {
    engine: AdmissionEngine,
    resolver: KeyResolver,
    strategies: Vec<Strategy>,
    default_extraction: Option<KeyExtractionStrategy>,
    routes: HashMap<String, RouteOverride>,
    bypass_rules: Vec<BypassRule>,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// The configured strategies, in evaluation order.
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Evaluate a request and render the admission decision.
    ///
    /// Strategy checks are conjunctive and ordered: the first rejecting
    /// strategy ends evaluation and its decision is returned as the binding
    /// constraint. Increments applied by strategies that already admitted
    /// are kept — there is no retroactive undo on partial rejection.
    pub async fn evaluate(&self, ctx: &RequestContext) -> RateLimitDecision {
        let route = ctx.route().and_then(|name| self.routes.get(name));
        let strategies = route
            .and_then(|r| r.strategies.as_deref())
            .unwrap_or(&self.strategies);
        let binding = &strategies[0];

        if route.map(|r| r.exempt).unwrap_or(false) {
            debug!(route = ctx.route().unwrap_or(""), "route exempt from rate limiting");
            return RateLimitDecision::bypassed(binding.max_requests(), binding.window());
        }

        // Bypassed traffic must never consume quota, so rules run before any
        // counter is touched.
        if self.bypass_rules.iter().any(|rule| rule.matches(ctx)) {
            debug!("bypass rule matched, admitting without counting");
            return RateLimitDecision::bypassed(binding.max_requests(), binding.window());
        }

        let key = self.resolver.resolve(
            ctx,
            route.and_then(|r| r.extraction.as_ref()),
            self.default_extraction.as_ref(),
        );

        let mut tightest: Option<RateLimitDecision> = None;
        for strategy in strategies {
            match self.engine.check_and_increment(&key, strategy).await {
                Ok(decision) if !decision.allowed => return decision,
                Ok(decision) => {
                    let tighter = tightest
                        .as_ref()
                        .map(|current| decision.remaining < current.remaining)
                        .unwrap_or(true);
                    if tighter {
                        tightest = Some(decision);
                    }
                }
                Err(err) => {
                    warn!(error = %err, policy = ?self.failure_policy, "counter store unavailable");
                    return self.degraded(strategy);
                }
            }
        }

        // The builder guarantees a non-empty strategy list.
        tightest.expect("at least one strategy evaluated")
    }

    /// Current usage for a request's identity without consuming quota.
    ///
    /// Reports the tightest strategy, like `evaluate`, but increments
    /// nothing and creates no records.
    pub async fn current_usage(&self, ctx: &RequestContext) -> RateLimitDecision {
        let route = ctx.route().and_then(|name| self.routes.get(name));
        let strategies = route
            .and_then(|r| r.strategies.as_deref())
            .unwrap_or(&self.strategies);

        let key = self.resolver.resolve(
            ctx,
            route.and_then(|r| r.extraction.as_ref()),
            self.default_extraction.as_ref(),
        );

        let mut tightest: Option<RateLimitDecision> = None;
        for strategy in strategies {
            match self.engine.current_usage(&key, strategy).await {
                Ok(decision) if !decision.allowed => return decision,
                Ok(decision) => {
                    let tighter = tightest
                        .as_ref()
                        .map(|current| decision.remaining < current.remaining)
                        .unwrap_or(true);
                    if tighter {
                        tightest = Some(decision);
                    }
                }
                Err(err) => {
                    warn!(error = %err, policy = ?self.failure_policy, "counter store unavailable");
                    return self.degraded(strategy);
                }
            }
        }

        tightest.expect("at least one strategy evaluated")
    }

    fn degraded(&self, strategy: &Strategy) -> RateLimitDecision {
        let allowed = matches!(self.failure_policy, FailurePolicy::FailOpen);
        RateLimitDecision::backend_unavailable(allowed, strategy.max_requests(), strategy.window())
    }
}

/// Builder for [`RateLimiter`]. Validates at `build` time so no invalid
/// configuration ever serves traffic.
#[derive(Default)]
pub struct RateLimiterBuilder {
    store: Option<Arc<dyn CounterStore>>,
    strategies: Vec<Strategy>,
    default_extraction: Option<KeyExtractionStrategy>,
    routes: HashMap<String, RouteOverride>,
    bypass_rules: Vec<BypassRule>,
    failure_policy: Option<FailurePolicy>,
}

impl RateLimiterBuilder {
    /// The counter store decisions are made against. Required.
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Append a strategy; evaluation follows registration order. When no
    /// strategy is registered, the default short/medium/long tiers apply.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies.extend(strategies);
        self
    }

    /// The service-wide default key extraction strategy. Without one, the
    /// caller address partitions counters.
    pub fn default_extraction(mut self, extraction: KeyExtractionStrategy) -> Self {
        self.default_extraction = Some(extraction);
        self
    }

    /// Register a per-route override.
    pub fn route(mut self, name: impl Into<String>, route: RouteOverride) -> Self {
        self.routes.insert(name.into(), route);
        self
    }

    /// Append a bypass rule; first match wins.
    pub fn bypass_rule(mut self, rule: BypassRule) -> Self {
        self.bypass_rules.push(rule);
        self
    }

    /// The fail-open/fail-closed policy. Required, deliberately: an
    /// unreachable store admitting or rejecting everything is not a choice
    /// to make by omission.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<RateLimiter> {
        let store = self
            .store
            .ok_or_else(|| TurnstileError::Config("a counter store is required".to_string()))?;
        let failure_policy = self.failure_policy.ok_or_else(|| {
            TurnstileError::Config(
                "failure policy must be set explicitly (fail-open or fail-closed)".to_string(),
            )
        })?;

        let strategies = if self.strategies.is_empty() {
            Strategy::default_tiers()
        } else {
            self.strategies
        };

        for (name, route) in &self.routes {
            if matches!(route.strategies.as_deref(), Some([])) {
                return Err(TurnstileError::Config(format!(
                    "route {:?} overrides strategies with an empty list",
                    name
                )));
            }
        }

        Ok(RateLimiter {
            engine: AdmissionEngine::new(store),
            resolver: KeyResolver::new(),
            strategies,
            default_extraction: self.default_extraction,
            routes: self.routes,
            bypass_rules: self.bypass_rules,
            failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::decision::DecisionReason;
    use crate::ratelimit::window::WindowSnapshot;
    use crate::storage::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::time::Duration;

    /// A store that is permanently down.
    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn check_and_increment(
            &self,
            _key: &str,
            _window: Duration,
            _limit: u64,
        ) -> std::result::Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn current_usage(
            &self,
            _key: &str,
            _window: Duration,
            _limit: u64,
        ) -> std::result::Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn reset(&self, _key: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    fn ctx() -> RequestContext {
        let addr: IpAddr = "198.51.100.7".parse().unwrap();
        RequestContext::new(addr)
    }

    fn strategy(name: &str, limit: u64, window_secs: u64) -> Strategy {
        Strategy::new(name, limit, Duration::from_secs(window_secs)).unwrap()
    }

    fn limiter_with(
        store: Arc<MemoryStore>,
        strategies: Vec<Strategy>,
    ) -> RateLimiter {
        RateLimiter::builder()
            .store(store)
            .strategies(strategies)
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_sequential_scenario_five_then_reject() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store, vec![strategy("short", 5, 10)]);

        for _ in 0..5 {
            assert!(limiter.evaluate(&ctx()).await.allowed);
        }

        let decision = limiter.evaluate(&ctx()).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::QuotaExceeded);
        assert_eq!(decision.rejecting_strategy.as_deref(), Some("short"));
        assert!(decision.retry_after.unwrap() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_bypass_never_touches_counters() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::builder()
            .store(store.clone())
            .strategy(strategy("short", 5, 10))
            .bypass_rule(BypassRule::HeaderEquals {
                name: "x-internal-token".to_string(),
                value: "svc-secret".to_string(),
            })
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        let bypassing = ctx().with_header("x-internal-token", "svc-secret");
        let decision = limiter.evaluate(&bypassing).await;

        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Bypassed);
        assert_eq!(decision.remaining, decision.limit);
        // No record was created, let alone incremented.
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_conjunctive_first_rejection_binds_and_keeps_increments() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(
            store.clone(),
            vec![strategy("short", 2, 60), strategy("long", 100, 3600)],
        );

        assert!(limiter.evaluate(&ctx()).await.allowed);
        assert!(limiter.evaluate(&ctx()).await.allowed);

        let rejected = limiter.evaluate(&ctx()).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.rejecting_strategy.as_deref(), Some("short"));
        assert_eq!(rejected.limit, 2);

        // The long strategy kept the two increments from the admitted
        // requests and saw nothing from the rejected one.
        let probe = limiter_with(store, vec![strategy("long", 100, 3600)]);
        let long_usage = probe.current_usage(&ctx()).await;
        assert_eq!(long_usage.remaining, 98);
    }

    #[tokio::test]
    async fn test_allowed_decision_reports_tightest_strategy() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(
            store,
            vec![strategy("loose", 10, 60), strategy("tight", 3, 60)],
        );

        let decision = limiter.evaluate(&ctx()).await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 3);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_fail_closed_rejects_with_distinct_reason() {
        let limiter = RateLimiter::builder()
            .store(Arc::new(UnreachableStore))
            .strategy(strategy("short", 5, 10))
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        let decision = limiter.evaluate(&ctx()).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::BackendUnavailable);
        assert!(decision.rejecting_strategy.is_none());
    }

    #[tokio::test]
    async fn test_fail_open_admits_during_outage() {
        let limiter = RateLimiter::builder()
            .store(Arc::new(UnreachableStore))
            .strategy(strategy("short", 5, 10))
            .failure_policy(FailurePolicy::FailOpen)
            .build()
            .unwrap();

        let decision = limiter.evaluate(&ctx()).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_route_extraction_override_beats_default() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::builder()
            .store(store)
            .strategy(strategy("short", 1, 60))
            .default_extraction(KeyExtractionStrategy::Address)
            .route(
                "login",
                RouteOverride {
                    extraction: Some(KeyExtractionStrategy::header("x-api-key")),
                    ..Default::default()
                },
            )
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        let first_ip: IpAddr = "10.0.0.1".parse().unwrap();
        let second_ip: IpAddr = "10.0.0.2".parse().unwrap();

        let first = RequestContext::new(first_ip)
            .with_route("login")
            .with_header("x-api-key", "shared-key");
        let second = RequestContext::new(second_ip)
            .with_route("login")
            .with_header("x-api-key", "shared-key");

        // Same key from different addresses shares one window, so the
        // header (not the address) is partitioning.
        assert!(limiter.evaluate(&first).await.allowed);
        assert!(!limiter.evaluate(&second).await.allowed);
    }

    #[tokio::test]
    async fn test_route_strategy_override() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::builder()
            .store(store)
            .strategy(strategy("default", 100, 60))
            .route(
                "expensive",
                RouteOverride {
                    strategies: Some(vec![strategy("expensive", 1, 60)]),
                    ..Default::default()
                },
            )
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        let request = ctx().with_route("expensive");
        assert!(limiter.evaluate(&request).await.allowed);

        let rejected = limiter.evaluate(&request).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.rejecting_strategy.as_deref(), Some("expensive"));
    }

    #[tokio::test]
    async fn test_exempt_route_bypasses() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::builder()
            .store(store.clone())
            .strategy(strategy("short", 1, 60))
            .route(
                "healthz",
                RouteOverride {
                    exempt: true,
                    ..Default::default()
                },
            )
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        for _ in 0..10 {
            let decision = limiter.evaluate(&ctx().with_route("healthz")).await;
            assert!(decision.allowed);
            assert_eq!(decision.reason, DecisionReason::Bypassed);
        }
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_default_tiers_when_unconfigured() {
        let limiter = RateLimiter::builder()
            .store(Arc::new(MemoryStore::new()))
            .failure_policy(FailurePolicy::FailClosed)
            .build()
            .unwrap();

        let names: Vec<&str> = limiter.strategies().iter().map(Strategy::name).collect();
        assert_eq!(names, ["short", "medium", "long"]);
    }

    #[test]
    fn test_builder_requires_failure_policy() {
        let result = RateLimiter::builder()
            .store(Arc::new(MemoryStore::new()))
            .build();

        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_builder_requires_store() {
        let result = RateLimiter::builder()
            .failure_policy(FailurePolicy::FailOpen)
            .build();

        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_empty_route_strategy_list() {
        let result = RateLimiter::builder()
            .store(Arc::new(MemoryStore::new()))
            .failure_policy(FailurePolicy::FailOpen)
            .route(
                "bad",
                RouteOverride {
                    strategies: Some(vec![]),
                    ..Default::default()
                },
            )
            .build();

        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }
}
