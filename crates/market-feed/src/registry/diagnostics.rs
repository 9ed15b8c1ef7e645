//! Per-request provider attempt tracking.

use serde::Serialize;

use crate::errors::{ErrorType, MarketDataError};
use crate::models::ProviderId;

/// Record of a single provider attempt during a fetch.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Calls made to this provider, retries included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<u32>,
}

/// Detailed result of a fetch operation.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_error(&mut self, provider_id: ProviderId, error: &MarketDataError) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            success: false,
            error_type: Some(error.error_type()),
            error: Some(error.to_string()),
            calls: error.attempts(),
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            success: true,
            error_type: None,
            error: None,
            calls: None,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.provider_id)
                } else if let Some(err) = &a.error {
                    format!("{}: ERROR ({})", a.provider_id, err)
                } else {
                    format!("{}: UNKNOWN", a.provider_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Check if any provider succeeded.
    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Get all errors.
    pub fn errors(&self) -> Vec<(&ProviderId, &str)> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| (&a.provider_id, e.as_str())))
            .collect()
    }

    pub fn into_attempts(self) -> Vec<ProviderAttempt> {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn outage() -> MarketDataError {
        MarketDataError::Exhausted {
            attempts: 4,
            source: Box::new(MarketDataError::ServiceUnavailable {
                provider: "ALPHA".to_string(),
                message: "HTTP 503".to_string(),
                retry_after_seconds: None,
            }),
        }
    }

    #[test]
    fn test_diagnostics_summary() {
        let mut diag = FetchDiagnostics::new();
        diag.record_error(Cow::Borrowed("ALPHA"), &outage());
        diag.record_success(Cow::Borrowed("BETA"));

        let summary = diag.summary();
        assert!(summary.starts_with("ALPHA: ERROR (Service unavailable"));
        assert!(summary.ends_with("BETA: SUCCESS"));
        assert_eq!(diag.attempts[0].calls, Some(4));
        assert_eq!(
            diag.attempts[0].error_type,
            Some(ErrorType::ServiceUnavailable)
        );
    }

    #[test]
    fn test_has_success() {
        let mut diag = FetchDiagnostics::new();
        diag.record_error(Cow::Borrowed("ALPHA"), &outage());
        assert!(!diag.has_success());
        assert_eq!(diag.errors().len(), 1);

        diag.record_success(Cow::Borrowed("BETA"));
        assert!(diag.has_success());
    }
}
