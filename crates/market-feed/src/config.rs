//! Feed configuration.
//!
//! [`FeedConfig`] gathers the settings of every component. It deserializes
//! from JSON with defaults for anything left out, and `MF_*` environment
//! variables override individual values on top.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{RateLimit, RetryPolicy};
use crate::reconcile::ReconcilerConfig;
use crate::registry::{CircuitBreakerConfig, HealthConfig, OrchestratorConfig, ValidatorConfig};

/// Path of a JSON config file read by [`FeedConfig::from_env`].
pub const CONFIG_FILE_ENV: &str = "MF_CONFIG_FILE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedConfig {
    /// Overrides every provider's declared rate limit when set.
    pub rate_limit: Option<RateLimit>,
    /// Overrides every provider's declared retry policy when set.
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub orchestrator: OrchestratorConfig,
    pub reconciler: ReconcilerConfig,
    pub validator: ValidatorConfig,
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl FeedConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        debug!("Loading feed config from {}", path.as_ref().display());
        Self::from_json(&contents)
    }

    /// Defaults, then the file named by `MF_CONFIG_FILE` (if any), then
    /// individual `MF_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `MF_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let millis = |key: &str, value: &str| parse::<u64>(key, value).map(Duration::from_millis);

        if let Some(v) = lookup("MF_RATE_LIMIT_PER_MINUTE") {
            let limit = self.rate_limit.get_or_insert_with(RateLimit::default);
            limit.requests_per_minute = parse("MF_RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = lookup("MF_RATE_LIMIT_PER_DAY") {
            let limit = self.rate_limit.get_or_insert_with(RateLimit::default);
            limit.requests_per_day = parse("MF_RATE_LIMIT_PER_DAY", &v)?;
        }

        if let Some(v) = lookup("MF_RETRY_MAX_RETRIES") {
            let policy = self.retry.get_or_insert_with(RetryPolicy::default);
            policy.max_retries = parse("MF_RETRY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("MF_RETRY_BASE_DELAY_MS") {
            let policy = self.retry.get_or_insert_with(RetryPolicy::default);
            policy.base_delay = millis("MF_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("MF_RETRY_MAX_DELAY_MS") {
            let policy = self.retry.get_or_insert_with(RetryPolicy::default);
            policy.max_delay = millis("MF_RETRY_MAX_DELAY_MS", &v)?;
        }

        if let Some(v) = lookup("MF_CIRCUIT_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = parse("MF_CIRCUIT_FAILURE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("MF_CIRCUIT_RECOVERY_TIMEOUT_MS") {
            self.circuit_breaker.recovery_timeout = millis("MF_CIRCUIT_RECOVERY_TIMEOUT_MS", &v)?;
        }

        if let Some(v) = lookup("MF_HEALTH_MAX_CONSECUTIVE_FAILURES") {
            self.health.max_consecutive_failures =
                parse("MF_HEALTH_MAX_CONSECUTIVE_FAILURES", &v)?;
        }
        if let Some(v) = lookup("MF_HEALTH_COOLDOWN_MS") {
            self.health.cooldown = millis("MF_HEALTH_COOLDOWN_MS", &v)?;
        }

        if let Some(v) = lookup("MF_REQUEST_TIMEOUT_MS") {
            self.orchestrator.default_timeout = millis("MF_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MF_LOAD_BALANCING") {
            self.orchestrator.load_balancing = parse_bool("MF_LOAD_BALANCING", &v)?;
        }

        if let Some(v) = lookup("MF_MAX_INTERPOLATION_GAP") {
            self.reconciler.max_interpolation_gap = parse("MF_MAX_INTERPOLATION_GAP", &v)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = FeedConfig::from_json(
            r#"{
                "rateLimit": { "requestsPerMinute": 10 },
                "circuitBreaker": { "failureThreshold": 3, "recoveryTimeout": 15000 },
                "orchestrator": { "loadBalancing": false }
            }"#,
        )
        .unwrap();

        let limit = config.rate_limit.unwrap();
        assert_eq!(limit.requests_per_minute, 10);
        assert_eq!(limit.requests_per_day, 500);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(
            config.circuit_breaker.recovery_timeout,
            Duration::from_secs(15)
        );
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert!(!config.orchestrator.load_balancing);
        assert_eq!(config.health.max_consecutive_failures, 3);
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MF_RATE_LIMIT_PER_DAY", "25"),
            ("MF_RETRY_BASE_DELAY_MS", "250"),
            ("MF_HEALTH_COOLDOWN_MS", "60000"),
            ("MF_LOAD_BALANCING", "off"),
            ("MF_MAX_INTERPOLATION_GAP", "5"),
        ]);

        let mut config = FeedConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.rate_limit.unwrap().requests_per_day, 25);
        let retry = config.retry.unwrap();
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        assert_eq!(retry.max_retries, 3);
        assert_eq!(config.health.cooldown, Duration::from_secs(60));
        assert!(!config.orchestrator.load_balancing);
        assert_eq!(config.reconciler.max_interpolation_gap, 5);
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let mut config = FeedConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "MF_CIRCUIT_FAILURE_THRESHOLD").then(|| "many".to_string())
        });

        match result {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "MF_CIRCUIT_FAILURE_THRESHOLD");
                assert_eq!(value, "many");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, r#"{ "health": { "cooldown": 1000 } }"#).unwrap();

        let config = FeedConfig::from_file(&path).unwrap();
        assert_eq!(config.health.cooldown, Duration::from_secs(1));
    }
}
