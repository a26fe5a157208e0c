//! Named quota definitions.

use serde::Serialize;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// A named quota: at most `max_requests` per rolling `window`.
///
/// Strategies are validated at registration and immutable afterwards. The
/// order they are registered in is the order the decision service evaluates
/// them in.
#[derive(Debug, Clone, Serialize)]
pub struct Strategy {
    name: String,
    max_requests: u64,
    window: Duration,
}

impl Strategy {
    /// Register a strategy, rejecting non-positive windows and quotas up
    /// front so no invalid strategy ever serves traffic.
    pub fn new(name: impl Into<String>, max_requests: u64, window: Duration) -> Result<Self> {
        let name = name.into();
        if max_requests == 0 {
            return Err(TurnstileError::InvalidStrategyConfig {
                name,
                reason: "max_requests must be greater than zero".to_string(),
            });
        }
        if window.is_zero() {
            return Err(TurnstileError::InvalidStrategyConfig {
                name,
                reason: "window must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            name,
            max_requests,
            window,
        })
    }

    /// The short/medium/long tiers used when no strategies are configured:
    /// 3/minute, 20/10 minutes, 100/hour.
    pub fn default_tiers() -> Vec<Strategy> {
        vec![
            Strategy::new("short", 3, Duration::from_secs(60)).unwrap(),
            Strategy::new("medium", 20, Duration::from_secs(600)).unwrap(),
            Strategy::new("long", 100, Duration::from_secs(3600)).unwrap(),
        ]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_strategy() {
        let strategy = Strategy::new("short", 5, Duration::from_secs(10)).unwrap();
        assert_eq!(strategy.name(), "short");
        assert_eq!(strategy.max_requests(), 5);
        assert_eq!(strategy.window(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_quota_rejected() {
        let err = Strategy::new("bad", 0, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::InvalidStrategyConfig { name, .. } if name == "bad"
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = Strategy::new("bad", 5, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidStrategyConfig { .. }));
    }

    #[test]
    fn test_default_tiers() {
        let tiers = Strategy::default_tiers();
        let names: Vec<&str> = tiers.iter().map(Strategy::name).collect();
        assert_eq!(names, ["short", "medium", "long"]);
        assert_eq!(tiers[0].max_requests(), 3);
        assert_eq!(tiers[2].window(), Duration::from_secs(3600));
    }
}
