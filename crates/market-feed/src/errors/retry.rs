use std::time::Duration;

use super::MarketDataError;

/// How bad a failure is, as judged by the classifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Classification for retry policy.
///
/// Produced by an [`ErrorClassifier`] for every failed attempt.
///
/// | Error | Retryable | Suggested delay |
/// |-------|-----------|-----------------|
/// | `RateLimited` (minute window) | yes | provider cooldown |
/// | `RateLimited` (daily cap) | no | - |
/// | `Network` | yes | backoff |
/// | `ServiceUnavailable` | yes | `Retry-After` if sent |
/// | `CircuitOpen` | no (skip to the next provider) | - |
/// | everything else | no | - |
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorClassification {
    /// Whether the same operation should be attempted again.
    pub retryable: bool,
    pub severity: Severity,
    /// Wait dictated by the error itself; overrides exponential backoff.
    pub suggested_delay: Option<Duration>,
}

/// Decides whether and when a failed attempt is retried.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &MarketDataError) -> ErrorClassification;
}

/// Classifier used by the orchestrator unless another one is injected.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, error: &MarketDataError) -> ErrorClassification {
        let suggested_delay = error.retry_after_seconds().map(Duration::from_secs);

        match error.root() {
            MarketDataError::RateLimited {
                daily_limit: false,
                ..
            } => ErrorClassification {
                retryable: true,
                severity: Severity::Low,
                suggested_delay,
            },
            MarketDataError::RateLimited {
                daily_limit: true, ..
            } => ErrorClassification {
                retryable: false,
                severity: Severity::Medium,
                suggested_delay: None,
            },
            MarketDataError::Network { .. } => ErrorClassification {
                retryable: true,
                severity: Severity::Medium,
                suggested_delay: None,
            },
            MarketDataError::ServiceUnavailable { .. } => ErrorClassification {
                retryable: true,
                severity: Severity::High,
                suggested_delay,
            },
            // An open circuit will not close within a backoff window.
            MarketDataError::CircuitOpen { .. } => ErrorClassification {
                retryable: false,
                severity: Severity::High,
                suggested_delay: None,
            },
            MarketDataError::InvalidApiKey { .. } => ErrorClassification {
                retryable: false,
                severity: Severity::Critical,
                suggested_delay: None,
            },
            _ => ErrorClassification {
                retryable: false,
                severity: Severity::Medium,
                suggested_delay: None,
            },
        }
    }
}
