//! Key resolution under the priority policy.

use tracing::trace;

use crate::context::RequestContext;
use crate::extract::KeyExtractionStrategy;

/// Resolves the identity key for a request.
///
/// Priority, highest first: route-specific strategy, then the configured
/// default, then the caller address. Resolution never fails: if the winning
/// strategy cannot produce a key for this request, the caller address is the
/// terminal answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyResolver;

impl KeyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Derive the partition key for `ctx`.
    ///
    /// `route_strategy` is the per-route override (set at route registration),
    /// `default_strategy` the middleware-wide default. Both are optional; the
    /// address fallback is always available.
    pub fn resolve(
        &self,
        ctx: &RequestContext,
        route_strategy: Option<&KeyExtractionStrategy>,
        default_strategy: Option<&KeyExtractionStrategy>,
    ) -> String {
        let selected = route_strategy.or(default_strategy);

        if let Some(strategy) = selected {
            if let Some(key) = strategy.extract(ctx) {
                return key;
            }
            trace!(
                strategy = ?strategy,
                "extraction failed, falling back to caller address"
            );
        }

        ctx.remote_addr().to_string()
    }
}
