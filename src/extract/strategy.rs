//! Key extraction strategies.
//!
//! A strategy is a pure specification of how to derive a partition key from
//! a [`RequestContext`]. Extraction has no side effects and is deterministic:
//! the same context under the same strategy always yields the same key.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::context::RequestContext;

/// Signature for opaque custom extractors.
///
/// A custom extractor inspects the context and either produces a key or
/// declines. It must not panic; returning `None` (or an empty string) is the
/// supported failure mode.
pub type CustomExtractor = Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>;

/// Expected type of a query-parameter key component.
///
/// Coercion failures are absorbed as extraction failures, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
}

impl ParamType {
    /// Coerce a raw parameter value, canonicalizing it so that equal values
    /// produce equal keys (`"07"` and `"7"` both become `"7"`).
    fn coerce(&self, raw: &str) -> Option<String> {
        match self {
            ParamType::String => Some(raw.to_string()),
            ParamType::Integer => raw.trim().parse::<i64>().ok().map(|v| v.to_string()),
            ParamType::Float => raw.trim().parse::<f64>().ok().map(|v| v.to_string()),
            ParamType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some("true".to_string()),
                "false" | "0" => Some("false".to_string()),
                _ => None,
            },
        }
    }
}

/// How to derive the identity key that partitions rate limit counters.
#[derive(Clone)]
pub enum KeyExtractionStrategy {
    /// The caller's network address. Always succeeds.
    Address,
    /// A named header's value. Fails if the header is absent.
    Header(String),
    /// A named query parameter coerced to the given type. Fails if the
    /// parameter is absent or coercion fails.
    QueryParam(String, ParamType),
    /// An opaque extractor supplied by the adapter.
    Custom(CustomExtractor),
    /// Every sub-strategy extracted in order, successes joined with the
    /// separator. Fails only when all parts fail.
    Combined(Vec<KeyExtractionStrategy>, String),
    /// Sub-strategies tried in order; the first success wins.
    Fallback(Vec<KeyExtractionStrategy>),
}

impl KeyExtractionStrategy {
    /// Convenience constructor for a header-based strategy.
    pub fn header(name: impl Into<String>) -> Self {
        Self::Header(name.into())
    }

    /// Convenience constructor for a query-parameter strategy.
    pub fn query_param(name: impl Into<String>, ty: ParamType) -> Self {
        Self::QueryParam(name.into(), ty)
    }

    /// Convenience constructor for a custom extractor.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Convenience constructor for a combined strategy with the default
    /// `:` separator.
    pub fn combined(parts: Vec<KeyExtractionStrategy>) -> Self {
        Self::Combined(parts, ":".to_string())
    }

    /// Convenience constructor for a fallback chain.
    pub fn fallback(chain: Vec<KeyExtractionStrategy>) -> Self {
        Self::Fallback(chain)
    }

    /// Attempt to extract a key from the context.
    ///
    /// `None` means this strategy failed for this request; the resolver
    /// decides what happens next.
    pub fn extract(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            KeyExtractionStrategy::Address => Some(ctx.remote_addr().to_string()),
            KeyExtractionStrategy::Header(name) => {
                let value = ctx.header(name).filter(|v| !v.is_empty());
                if value.is_none() {
                    trace!(header = %name, "header extraction missed");
                }
                value.map(str::to_string)
            }
            KeyExtractionStrategy::QueryParam(name, ty) => {
                let value = ctx.query_param(name).and_then(|raw| ty.coerce(raw));
                if value.is_none() {
                    trace!(param = %name, "query parameter extraction missed");
                }
                value
            }
            KeyExtractionStrategy::Custom(f) => f(ctx).filter(|v| !v.is_empty()),
            KeyExtractionStrategy::Combined(parts, separator) => {
                let extracted: Vec<String> =
                    parts.iter().filter_map(|part| part.extract(ctx)).collect();
                if extracted.is_empty() {
                    None
                } else {
                    Some(extracted.join(separator))
                }
            }
            KeyExtractionStrategy::Fallback(chain) => {
                chain.iter().find_map(|candidate| candidate.extract(ctx))
            }
        }
    }
}

impl fmt::Debug for KeyExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExtractionStrategy::Address => write!(f, "Address"),
            KeyExtractionStrategy::Header(name) => f.debug_tuple("Header").field(name).finish(),
            KeyExtractionStrategy::QueryParam(name, ty) => {
                f.debug_tuple("QueryParam").field(name).field(ty).finish()
            }
            KeyExtractionStrategy::Custom(_) => write!(f, "Custom(..)"),
            KeyExtractionStrategy::Combined(parts, separator) => f
                .debug_tuple("Combined")
                .field(parts)
                .field(separator)
                .finish(),
            KeyExtractionStrategy::Fallback(chain) => {
                f.debug_tuple("Fallback").field(chain).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn ctx() -> RequestContext {
        let addr: IpAddr = "192.168.1.50".parse().unwrap();
        RequestContext::new(addr)
            .with_header("authorization", "Bearer abc")
            .with_query_param("user_id", "007")
            .with_query_param("flag", "1")
            .with_query_param("name", "alice")
    }

    #[test]
    fn test_address_always_succeeds() {
        let strategy = KeyExtractionStrategy::Address;
        assert_eq!(strategy.extract(&ctx()), Some("192.168.1.50".to_string()));
    }

    #[test]
    fn test_header_missing_fails() {
        let strategy = KeyExtractionStrategy::header("x-api-key");
        assert_eq!(strategy.extract(&ctx()), None);
    }

    #[test]
    fn test_query_param_integer_canonicalized() {
        let strategy = KeyExtractionStrategy::query_param("user_id", ParamType::Integer);
        assert_eq!(strategy.extract(&ctx()), Some("7".to_string()));
    }

    #[test]
    fn test_query_param_coercion_failure_absorbed() {
        let strategy = KeyExtractionStrategy::query_param("name", ParamType::Integer);
        assert_eq!(strategy.extract(&ctx()), None);
    }

    #[test]
    fn test_query_param_boolean() {
        let strategy = KeyExtractionStrategy::query_param("flag", ParamType::Boolean);
        assert_eq!(strategy.extract(&ctx()), Some("true".to_string()));
    }

    #[test]
    fn test_custom_empty_is_failure() {
        let strategy = KeyExtractionStrategy::custom(|_| Some(String::new()));
        assert_eq!(strategy.extract(&ctx()), None);

        let strategy = KeyExtractionStrategy::custom(|c: &RequestContext| {
            c.extension("tenant").map(str::to_string)
        });
        assert_eq!(strategy.extract(&ctx()), None);
        let with_ext = ctx().with_extension("tenant", "acme");
        assert_eq!(strategy.extract(&with_ext), Some("acme".to_string()));
    }

    #[test]
    fn test_combined_joins_successes() {
        let strategy = KeyExtractionStrategy::Combined(
            vec![
                KeyExtractionStrategy::header("x-api-key"),
                KeyExtractionStrategy::header("authorization"),
                KeyExtractionStrategy::Address,
            ],
            "|".to_string(),
        );
        assert_eq!(
            strategy.extract(&ctx()),
            Some("Bearer abc|192.168.1.50".to_string())
        );
    }

    #[test]
    fn test_combined_fails_only_when_all_parts_fail() {
        let strategy = KeyExtractionStrategy::combined(vec![
            KeyExtractionStrategy::header("x-missing"),
            KeyExtractionStrategy::query_param("absent", ParamType::String),
        ]);
        assert_eq!(strategy.extract(&ctx()), None);
    }

    #[test]
    fn test_fallback_first_success_wins() {
        let strategy = KeyExtractionStrategy::fallback(vec![
            KeyExtractionStrategy::header("x-api-key"),
            KeyExtractionStrategy::header("authorization"),
            KeyExtractionStrategy::Address,
        ]);

        // Deterministic across repeated calls.
        for _ in 0..3 {
            assert_eq!(strategy.extract(&ctx()), Some("Bearer abc".to_string()));
        }
    }

    #[test]
    fn test_extraction_is_pure() {
        let strategy = KeyExtractionStrategy::header("authorization");
        let context = ctx();
        let first = strategy.extract(&context);
        let second = strategy.extract(&context);
        assert_eq!(first, second);
    }
}
