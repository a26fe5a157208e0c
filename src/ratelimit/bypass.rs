//! Bypass rules evaluated before any counter mutation.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::context::RequestContext;

/// Predicate signature for custom bypass rules.
pub type BypassPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// A predicate over the request context. Matching any configured rule admits
/// the request without touching a counter — bypassed traffic never consumes
/// quota.
#[derive(Clone)]
pub enum BypassRule {
    /// Caller address is in the allowlist.
    IpAllowlist(Vec<IpAddr>),
    /// The named header is present with exactly this value.
    HeaderEquals { name: String, value: String },
    /// The request path starts with this prefix (health checks, metrics).
    PathPrefix(String),
    /// An adapter-supplied predicate.
    Custom(BypassPredicate),
}

impl BypassRule {
    /// Convenience constructor for a custom predicate.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate the rule against a request. Stateless and side-effect free.
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        match self {
            BypassRule::IpAllowlist(addrs) => addrs.contains(&ctx.remote_addr()),
            BypassRule::HeaderEquals { name, value } => ctx.header(name) == Some(value.as_str()),
            BypassRule::PathPrefix(prefix) => ctx
                .path()
                .map(|path| path.starts_with(prefix))
                .unwrap_or(false),
            BypassRule::Custom(predicate) => predicate(ctx),
        }
    }
}

impl fmt::Debug for BypassRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BypassRule::IpAllowlist(addrs) => f.debug_tuple("IpAllowlist").field(addrs).finish(),
            BypassRule::HeaderEquals { name, value } => f
                .debug_struct("HeaderEquals")
                .field("name", name)
                .field("value", value)
                .finish(),
            BypassRule::PathPrefix(prefix) => f.debug_tuple("PathPrefix").field(prefix).finish(),
            BypassRule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
