//! Provider request budgets and retry policies.
//!
//! This module defines how each provider may be called: how many requests
//! fit in its quota and how aggressively failed calls are retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Request budget for a provider.
///
/// Free tiers of the supported providers sit around 5 calls per minute and a
/// few hundred per day; both limits are enforced locally before calling out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimit {
    /// Maximum requests in any trailing 60-second window.
    pub requests_per_minute: u32,

    /// Maximum requests per UTC day.
    pub requests_per_day: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 5,
            requests_per_day: 500,
        }
    }
}

/// Retry behaviour for calls to a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound for the computed backoff.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
