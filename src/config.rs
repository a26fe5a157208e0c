//! Configuration management for Turnstile.
//!
//! Configuration files are a declarative mirror of the runtime types: they
//! parse with serde and convert into validated [`Strategy`],
//! [`KeyExtractionStrategy`], and [`BypassRule`] values at build time.
//! Custom extractors and custom bypass predicates are code, not data, and
//! are attached through the [`RateLimiterBuilder`] instead.
//!
//! [`RateLimiterBuilder`]: crate::ratelimit::RateLimiterBuilder

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::extract::{KeyExtractionStrategy, ParamType};
use crate::ratelimit::{
    BypassRule, FailurePolicy, RateLimiter, RouteOverride, Strategy,
};
use crate::storage::{CounterStore, MemoryStore, RedisStore, RedisStoreConfig};

/// Main configuration for a Turnstile rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Quota strategies, in evaluation order. Empty means the default
    /// short/medium/long tiers.
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,

    /// Service-wide key extraction. Without one, the caller address
    /// partitions counters.
    #[serde(default)]
    pub default_extraction: Option<ExtractorConfig>,

    /// Per-route overrides, keyed by route identifier.
    #[serde(default)]
    pub routes: HashMap<String, RouteConfig>,

    /// Bypass rules, first match wins.
    #[serde(default)]
    pub bypass: Vec<BypassRuleConfig>,

    /// Behavior when the counter store is unreachable. Deliberately has no
    /// default: a config that omits it does not parse.
    pub on_backend_error: FailurePolicy,

    /// Counter store selection.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// A quota strategy as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub max_requests: u64,
    pub window_secs: u64,
}

impl StrategyConfig {
    fn into_strategy(self) -> Result<Strategy> {
        Strategy::new(
            self.name,
            self.max_requests,
            Duration::from_secs(self.window_secs),
        )
    }
}

/// Expected type of a query-parameter value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
}

impl From<ValueType> for ParamType {
    fn from(ty: ValueType) -> Self {
        match ty {
            ValueType::String => ParamType::String,
            ValueType::Integer => ParamType::Integer,
            ValueType::Float => ParamType::Float,
            ValueType::Boolean => ParamType::Boolean,
        }
    }
}

fn default_separator() -> String {
    ":".to_string()
}

/// A key extraction strategy as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorConfig {
    Address,
    Header {
        name: String,
    },
    QueryParam {
        name: String,
        #[serde(default)]
        value_type: ValueType,
    },
    Combined {
        parts: Vec<ExtractorConfig>,
        #[serde(default = "default_separator")]
        separator: String,
    },
    Fallback {
        chain: Vec<ExtractorConfig>,
    },
}

impl ExtractorConfig {
    fn into_strategy(self) -> KeyExtractionStrategy {
        match self {
            ExtractorConfig::Address => KeyExtractionStrategy::Address,
            ExtractorConfig::Header { name } => KeyExtractionStrategy::Header(name),
            ExtractorConfig::QueryParam { name, value_type } => {
                KeyExtractionStrategy::QueryParam(name, value_type.into())
            }
            ExtractorConfig::Combined { parts, separator } => KeyExtractionStrategy::Combined(
                parts.into_iter().map(ExtractorConfig::into_strategy).collect(),
                separator,
            ),
            ExtractorConfig::Fallback { chain } => KeyExtractionStrategy::Fallback(
                chain.into_iter().map(ExtractorConfig::into_strategy).collect(),
            ),
        }
    }
}

/// Per-route configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Names of configured strategies to evaluate for this route.
    #[serde(default)]
    pub strategies: Option<Vec<String>>,

    /// Key extraction override for this route.
    #[serde(default)]
    pub extraction: Option<ExtractorConfig>,

    /// Exempt the route from rate limiting.
    #[serde(default)]
    pub exempt: bool,
}

/// A bypass rule as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BypassRuleConfig {
    IpAllowlist { addrs: Vec<IpAddr> },
    HeaderEquals { name: String, value: String },
    PathPrefix { prefix: String },
}

impl From<BypassRuleConfig> for BypassRule {
    fn from(config: BypassRuleConfig) -> Self {
        match config {
            BypassRuleConfig::IpAllowlist { addrs } => BypassRule::IpAllowlist(addrs),
            BypassRuleConfig::HeaderEquals { name, value } => {
                BypassRule::HeaderEquals { name, value }
            }
            BypassRuleConfig::PathPrefix { prefix } => BypassRule::PathPrefix(prefix),
        }
    }
}

fn default_redis_key_prefix() -> String {
    "turnstile:".to_string()
}

fn default_redis_op_timeout_ms() -> u64 {
    250
}

/// Counter store selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Process-local store; single-instance deployments and tests.
    #[default]
    Memory,
    /// Shared Redis store; multi-instance deployments.
    Redis {
        url: String,
        #[serde(default = "default_redis_key_prefix")]
        key_prefix: String,
        #[serde(default = "default_redis_op_timeout_ms")]
        op_timeout_ms: u64,
    },
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading turnstile configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("failed to parse configuration: {}", e)))
    }

    /// Build a [`RateLimiter`], connecting to the configured backend.
    pub async fn build(self) -> Result<RateLimiter> {
        let store: Arc<dyn CounterStore> = match &self.backend {
            BackendConfig::Memory => Arc::new(MemoryStore::new()),
            BackendConfig::Redis {
                url,
                key_prefix,
                op_timeout_ms,
            } => {
                let mut redis_config = RedisStoreConfig::new(url.clone());
                redis_config.key_prefix = key_prefix.clone();
                redis_config.op_timeout = Duration::from_millis(*op_timeout_ms);
                Arc::new(RedisStore::connect(redis_config).await?)
            }
        };
        self.build_with_store(store)
    }

    /// Build a [`RateLimiter`] against an already-constructed store.
    pub fn build_with_store(self, store: Arc<dyn CounterStore>) -> Result<RateLimiter> {
        // Route overrides reference strategies by name, so resolve them
        // against the effective list, default tiers included.
        let strategies: Vec<Strategy> = if self.strategies.is_empty() {
            Strategy::default_tiers()
        } else {
            self.strategies
                .into_iter()
                .map(StrategyConfig::into_strategy)
                .collect::<Result<_>>()?
        };

        let mut builder = RateLimiter::builder()
            .store(store)
            .strategies(strategies.clone())
            .failure_policy(self.on_backend_error);

        if let Some(extraction) = self.default_extraction {
            builder = builder.default_extraction(extraction.into_strategy());
        }

        for (name, route) in self.routes {
            let route_strategies = match route.strategies {
                Some(names) => Some(
                    names
                        .iter()
                        .map(|wanted| {
                            strategies
                                .iter()
                                .find(|s| s.name() == wanted.as_str())
                                .cloned()
                                .ok_or_else(|| {
                                    TurnstileError::Config(format!(
                                        "route {:?} references unknown strategy {:?}",
                                        name, wanted
                                    ))
                                })
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                None => None,
            };

            builder = builder.route(
                name,
                RouteOverride {
                    strategies: route_strategies,
                    extraction: route.extraction.map(ExtractorConfig::into_strategy),
                    exempt: route.exempt,
                },
            );
        }

        for rule in self.bypass {
            builder = builder.bypass_rule(rule.into());
        }

        builder.build()
    }
}
