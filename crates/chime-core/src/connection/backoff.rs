//! Reconnect backoff.
//!
//! Exponential growth from `base_delay_ms`, capped at `max_delay_ms`, reset
//! after every successful connect.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    OFFLINE_AFTER_ATTEMPTS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS, RECONNECT_MULTIPLIER,
};

fn default_base_delay_ms() -> u64 {
    RECONNECT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    RECONNECT_MAX_DELAY_MS
}
fn default_multiplier() -> f64 {
    RECONNECT_MULTIPLIER
}
fn default_offline_after_attempts() -> u32 {
    OFFLINE_AFTER_ATTEMPTS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Consecutive failures before the client is reported offline. Retries
    /// continue past this point at the capped delay.
    #[serde(default = "default_offline_after_attempts")]
    pub offline_after_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: RECONNECT_BASE_DELAY_MS,
            max_delay_ms: RECONNECT_MAX_DELAY_MS,
            multiplier: RECONNECT_MULTIPLIER,
            offline_after_attempts: OFFLINE_AFTER_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn is_offline(&self, consecutive_failures: u32) -> bool {
        self.offline_after_attempts > 0 && consecutive_failures >= self.offline_after_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_then_caps() {
        let policy = ReconnectPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            offline_after_attempts: 3,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_offline_ceiling() {
        let policy = ReconnectPolicy {
            offline_after_attempts: 3,
            ..Default::default()
        };
        assert!(!policy.is_offline(2));
        assert!(policy.is_offline(3));

        let never = ReconnectPolicy {
            offline_after_attempts: 0,
            ..Default::default()
        };
        assert!(!never.is_offline(1_000));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let policy: ReconnectPolicy = serde_json::from_str(r#"{"maxDelayMs": 5000}"#).unwrap();
        assert_eq!(policy.max_delay_ms, 5_000);
        assert_eq!(policy.base_delay_ms, RECONNECT_BASE_DELAY_MS);
    }
}
