//! Error types and retry classification for the market feed crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The error enum every component speaks
//! - [`ErrorType`]: The machine-readable taxonomy exposed to callers
//! - [`ErrorResponse`]: The serialized error shape handed to UI consumers
//! - [`ErrorClassifier`]: How the retry scheduler decides whether to try again

mod retry;

pub use retry::{DefaultErrorClassifier, ErrorClassification, ErrorClassifier, Severity};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ProviderAttempt;

/// Machine-readable error taxonomy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    RateLimited,
    InvalidApiKey,
    SymbolNotFound,
    NetworkError,
    InvalidRequest,
    ServiceUnavailable,
    Cancelled,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::SymbolNotFound => "SYMBOL_NOT_FOUND",
            Self::NetworkError => "NETWORK_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while fetching market data.
///
/// Every failure is normalized into one of these variants before it leaves a
/// component. [`error_type`](Self::error_type) maps each variant onto the
/// public [`ErrorType`] taxonomy; wrapper variants (`Exhausted`,
/// `AllProvidersFailed`) delegate to the error they carry.
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    /// Request budget exhausted, either locally or as reported upstream.
    #[error("Rate limited: {provider}")]
    RateLimited {
        provider: String,
        /// Seconds until a new request can be admitted.
        retry_after_seconds: Option<u64>,
        /// True when the daily cap (not the minute window) is the cause.
        daily_limit: bool,
    },

    /// The provider rejected our credentials.
    #[error("Invalid API key: {provider}")]
    InvalidApiKey { provider: String },

    /// The symbol is unknown upstream.
    #[error("Symbol not found: {symbol}")]
    SymbolNotFound {
        symbol: String,
        /// Close matches offered by the provider, if any.
        suggestions: Vec<String>,
    },

    /// Transport failure, including per-call timeouts.
    #[error("Network error: {provider} - {message}")]
    Network {
        provider: String,
        message: String,
        timed_out: bool,
    },

    /// The caller sent something we cannot serve.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Upstream server error or outage.
    #[error("Service unavailable: {provider} - {message}")]
    ServiceUnavailable {
        provider: String,
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// Rejected by the provider's circuit breaker without calling it.
    #[error("Circuit open: {provider}")]
    CircuitOpen {
        provider: String,
        retry_after_seconds: u64,
    },

    /// Every point returned by the provider failed validation.
    #[error("Validation failed: {provider} - {message}")]
    ValidationFailed { provider: String, message: String },

    /// The caller cancelled the operation.
    #[error("Operation cancelled: {operation_id}")]
    Cancelled { operation_id: String },

    /// Every provider is disabled or excluded.
    #[error("No providers available")]
    NoProvidersAvailable,

    /// Retries stopped; carries the final error and how many attempts ran.
    #[error("{source} (after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<MarketDataError>,
    },

    /// Every candidate provider was tried and failed.
    #[error("All providers failed: {last}")]
    AllProvidersFailed {
        #[source]
        last: Box<MarketDataError>,
        attempts: Vec<ProviderAttempt>,
    },
}

impl MarketDataError {
    /// Build an `INVALID_REQUEST` error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Strip `Exhausted` / `AllProvidersFailed` wrappers.
    pub fn root(&self) -> &MarketDataError {
        match self {
            Self::Exhausted { source, .. } => source.root(),
            Self::AllProvidersFailed { last, .. } => last.root(),
            other => other,
        }
    }

    /// Returns the public taxonomy entry for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use market_feed::errors::{ErrorType, MarketDataError};
    ///
    /// let error = MarketDataError::CircuitOpen { provider: "ALPHA".to_string(), retry_after_seconds: 30 };
    /// assert_eq!(error.error_type(), ErrorType::ServiceUnavailable);
    /// ```
    pub fn error_type(&self) -> ErrorType {
        match self.root() {
            Self::RateLimited { .. } => ErrorType::RateLimited,
            Self::InvalidApiKey { .. } => ErrorType::InvalidApiKey,
            Self::SymbolNotFound { .. } => ErrorType::SymbolNotFound,
            Self::Network { .. } => ErrorType::NetworkError,
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::ServiceUnavailable { .. }
            | Self::CircuitOpen { .. }
            | Self::ValidationFailed { .. }
            | Self::NoProvidersAvailable => ErrorType::ServiceUnavailable,
            Self::Cancelled { .. } => ErrorType::Cancelled,
            Self::Exhausted { .. } | Self::AllProvidersFailed { .. } => {
                unreachable!("root() strips wrappers")
            }
        }
    }

    /// Whether trying again later can succeed without a configuration change.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::RateLimited { daily_limit, .. } => !daily_limit,
            Self::Network { .. }
            | Self::ServiceUnavailable { .. }
            | Self::CircuitOpen { .. }
            | Self::ValidationFailed { .. }
            | Self::NoProvidersAvailable => true,
            _ => false,
        }
    }

    /// Seconds the caller should wait before trying again, when known.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self.root() {
            Self::RateLimited {
                retry_after_seconds,
                ..
            }
            | Self::ServiceUnavailable {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            Self::CircuitOpen {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// Whether this error is the aggregate raised after every provider failed.
    pub fn is_all_providers_failed(&self) -> bool {
        matches!(
            self,
            Self::AllProvidersFailed { .. } | Self::NoProvidersAvailable
        )
    }

    /// Attempt count recorded by the retry scheduler, if any.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            Self::AllProvidersFailed { last, .. } => last.attempts(),
            _ => None,
        }
    }

    /// The provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self.root() {
            Self::RateLimited { provider, .. }
            | Self::InvalidApiKey { provider }
            | Self::Network { provider, .. }
            | Self::ServiceUnavailable { provider, .. }
            | Self::CircuitOpen { provider, .. }
            | Self::ValidationFailed { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Message suitable for display to an end user.
    pub fn user_friendly_message(&self) -> String {
        if self.is_all_providers_failed() {
            return match self.root() {
                Self::RateLimited { .. } => {
                    "All data providers have reached their request limits. Please try again later."
                        .to_string()
                }
                _ => "Market data is temporarily unavailable from every provider.".to_string(),
            };
        }

        match self.root() {
            Self::RateLimited {
                daily_limit: true, ..
            } => "The daily request limit for this data provider has been reached.".to_string(),
            Self::RateLimited {
                retry_after_seconds: Some(seconds),
                ..
            } => format!("Too many requests. Please wait {} seconds.", seconds),
            Self::RateLimited { .. } => "Too many requests. Please wait a moment.".to_string(),
            Self::InvalidApiKey { .. } => {
                "The API key for this data provider is invalid or missing.".to_string()
            }
            Self::SymbolNotFound {
                symbol,
                suggestions,
            } if !suggestions.is_empty() => format!(
                "Symbol '{}' was not found. Did you mean {}?",
                symbol,
                suggestions.join(", ")
            ),
            Self::SymbolNotFound { symbol, .. } => format!("Symbol '{}' was not found.", symbol),
            Self::Network {
                timed_out: true, ..
            } => "The data provider took too long to respond.".to_string(),
            Self::Network { .. } => "Could not reach the data provider.".to_string(),
            Self::InvalidRequest { message } => format!("Invalid request: {}", message),
            Self::ServiceUnavailable { .. } | Self::CircuitOpen { .. } => {
                "The data provider is temporarily unavailable.".to_string()
            }
            Self::ValidationFailed { .. } => {
                "The data provider returned data that could not be used.".to_string()
            }
            Self::Cancelled { .. } => "The request was cancelled.".to_string(),
            _ => "Market data is temporarily unavailable.".to_string(),
        }
    }

    /// Concrete next step for the user, where one exists.
    pub fn suggested_action(&self) -> Option<&'static str> {
        match self.root() {
            Self::RateLimited {
                daily_limit: true, ..
            } => Some("Try again tomorrow or switch to another data provider."),
            Self::RateLimited { .. } => Some("Wait for the cooldown to finish and try again."),
            Self::InvalidApiKey { .. } => Some("Check the API key in the provider settings."),
            Self::SymbolNotFound { .. } => Some("Check the ticker symbol and try again."),
            Self::Network { .. } => Some("Check your internet connection and try again."),
            Self::InvalidRequest { .. } => Some("Correct the request parameters."),
            Self::ServiceUnavailable { .. } | Self::CircuitOpen { .. } => {
                Some("Try again in a few minutes.")
            }
            _ => None,
        }
    }
}

/// Serialized error shape handed to consumers of the fetch contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    pub user_friendly_message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    pub all_providers_failed: bool,
}

impl From<&MarketDataError> for ErrorResponse {
    fn from(error: &MarketDataError) -> Self {
        Self {
            error_type: error.error_type(),
            message: error.to_string(),
            user_friendly_message: error.user_friendly_message(),
            retryable: error.is_retryable(),
            retry_after_seconds: error.retry_after_seconds(),
            suggested_action: error.suggested_action().map(str::to_string),
            all_providers_failed: error.is_all_providers_failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_rate_limit_is_retryable() {
        let error = MarketDataError::RateLimited {
            provider: "ALPHA".to_string(),
            retry_after_seconds: Some(12),
            daily_limit: false,
        };
        assert_eq!(error.error_type(), ErrorType::RateLimited);
        assert!(error.is_retryable());
        assert_eq!(error.retry_after_seconds(), Some(12));
    }

    #[test]
    fn test_daily_rate_limit_is_not_retryable() {
        let error = MarketDataError::RateLimited {
            provider: "ALPHA".to_string(),
            retry_after_seconds: Some(3600),
            daily_limit: true,
        };
        assert!(!error.is_retryable());
        assert_eq!(
            error.suggested_action(),
            Some("Try again tomorrow or switch to another data provider.")
        );
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        let errors = [
            MarketDataError::InvalidApiKey {
                provider: "BETA".to_string(),
            },
            MarketDataError::SymbolNotFound {
                symbol: "ZZZZ".to_string(),
                suggestions: vec![],
            },
            MarketDataError::invalid_request("bad symbol"),
            MarketDataError::Cancelled {
                operation_id: "op-1".to_string(),
            },
        ];
        for error in errors {
            assert!(!error.is_retryable(), "{:?} should be terminal", error);
        }
    }

    #[test]
    fn test_circuit_open_maps_to_service_unavailable() {
        let error = MarketDataError::CircuitOpen {
            provider: "ALPHA".to_string(),
            retry_after_seconds: 45,
        };
        assert_eq!(error.error_type(), ErrorType::ServiceUnavailable);
        assert!(error.is_retryable());
        assert_eq!(error.retry_after_seconds(), Some(45));
    }

    #[test]
    fn test_wrappers_delegate_to_root() {
        let inner = MarketDataError::Network {
            provider: "ALPHA".to_string(),
            message: "connection reset".to_string(),
            timed_out: false,
        };
        let exhausted = MarketDataError::Exhausted {
            attempts: 4,
            source: Box::new(inner),
        };
        let aggregate = MarketDataError::AllProvidersFailed {
            last: Box::new(exhausted.clone()),
            attempts: vec![],
        };

        assert_eq!(exhausted.error_type(), ErrorType::NetworkError);
        assert_eq!(exhausted.attempts(), Some(4));
        assert_eq!(aggregate.error_type(), ErrorType::NetworkError);
        assert_eq!(aggregate.attempts(), Some(4));
        assert!(aggregate.is_all_providers_failed());
        assert!(!exhausted.is_all_providers_failed());
        assert_eq!(aggregate.provider(), Some("ALPHA"));
    }

    #[test]
    fn test_symbol_not_found_mentions_suggestions() {
        let error = MarketDataError::SymbolNotFound {
            symbol: "APPL".to_string(),
            suggestions: vec!["AAPL".to_string()],
        };
        assert_eq!(
            error.user_friendly_message(),
            "Symbol 'APPL' was not found. Did you mean AAPL?"
        );
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::Exhausted {
            attempts: 3,
            source: Box::new(MarketDataError::ServiceUnavailable {
                provider: "BETA".to_string(),
                message: "HTTP 503".to_string(),
                retry_after_seconds: None,
            }),
        };
        assert_eq!(
            format!("{}", error),
            "Service unavailable: BETA - HTTP 503 (after 3 attempts)"
        );
    }

    #[test]
    fn test_error_response_shape() {
        let error = MarketDataError::AllProvidersFailed {
            last: Box::new(MarketDataError::RateLimited {
                provider: "BETA".to_string(),
                retry_after_seconds: Some(30),
                daily_limit: false,
            }),
            attempts: vec![],
        };
        let response = ErrorResponse::from(&error);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], "RATE_LIMITED");
        assert_eq!(json["retryable"], true);
        assert_eq!(json["retryAfterSeconds"], 30);
        assert_eq!(json["allProvidersFailed"], true);
        assert!(json["userFriendlyMessage"]
            .as_str()
            .unwrap()
            .contains("request limits"));
    }
}
