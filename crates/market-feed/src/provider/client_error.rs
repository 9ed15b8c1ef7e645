//! Raw provider failures and their normalization.

use thiserror::Error;

use crate::errors::MarketDataError;

/// A failure as a provider client sees it.
///
/// These never leave the orchestrator: [`ClientError::normalize`] maps every
/// variant onto a [`MarketDataError`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
        /// Parsed `Retry-After` header, if present.
        retry_after_seconds: Option<u64>,
    },

    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// Connection, DNS or TLS failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A 200 response whose body carries an error or throttling note
    /// instead of data.
    #[error("Provider message: {0}")]
    ApiMessage(String),

    /// The client already knows which taxonomy entry applies.
    #[error(transparent)]
    Classified(#[from] MarketDataError),
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        match error.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                body: error.to_string(),
                retry_after_seconds: None,
            },
            None => Self::Transport(error.to_string()),
        }
    }
}

impl ClientError {
    /// Map onto the crate's error taxonomy.
    pub fn normalize(self, provider: &str, symbol: &str) -> MarketDataError {
        let provider = provider.to_string();
        match self {
            Self::Http {
                status,
                body,
                retry_after_seconds,
            } => match status {
                401 | 403 => MarketDataError::InvalidApiKey { provider },
                404 => MarketDataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                    suggestions: Vec::new(),
                },
                429 => MarketDataError::RateLimited {
                    provider,
                    retry_after_seconds,
                    daily_limit: false,
                },
                400 | 422 => MarketDataError::InvalidRequest {
                    message: format!("{} rejected the request: {}", provider, body),
                },
                500..=599 => MarketDataError::ServiceUnavailable {
                    provider,
                    message: format!("HTTP {}", status),
                    retry_after_seconds,
                },
                _ => MarketDataError::ServiceUnavailable {
                    provider,
                    message: format!("Unexpected HTTP {}: {}", status, body),
                    retry_after_seconds: None,
                },
            },
            Self::Timeout => MarketDataError::Network {
                provider,
                message: "Request timed out".to_string(),
                timed_out: true,
            },
            Self::Transport(message) => MarketDataError::Network {
                provider,
                message,
                timed_out: false,
            },
            Self::ApiMessage(message) => classify_message(provider, symbol, message),
            Self::Classified(error) => error,
        }
    }
}

/// Interpret the free-text notes providers put in otherwise successful bodies.
fn classify_message(provider: String, symbol: &str, message: String) -> MarketDataError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("api call frequency") {
        return minute_limit(provider);
    }
    if lower.contains("per day") || lower.contains("daily") {
        return MarketDataError::RateLimited {
            provider,
            retry_after_seconds: None,
            daily_limit: true,
        };
    }
    if lower.contains("rate limit") {
        return minute_limit(provider);
    }
    if lower.contains("api key") || lower.contains("apikey") {
        return MarketDataError::InvalidApiKey { provider };
    }
    if lower.contains("invalid api call") || lower.contains("not found") || lower.contains("no data")
    {
        return MarketDataError::SymbolNotFound {
            symbol: symbol.to_string(),
            suggestions: Vec::new(),
        };
    }

    MarketDataError::ServiceUnavailable {
        provider,
        message,
        retry_after_seconds: None,
    }
}

fn minute_limit(provider: String) -> MarketDataError {
    MarketDataError::RateLimited {
        provider,
        retry_after_seconds: Some(60),
        daily_limit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorType;

    fn http(status: u16) -> ClientError {
        ClientError::Http {
            status,
            body: String::new(),
            retry_after_seconds: Some(20),
        }
    }

    #[test]
    fn test_http_status_mapping() {
        let cases = [
            (401, ErrorType::InvalidApiKey),
            (403, ErrorType::InvalidApiKey),
            (404, ErrorType::SymbolNotFound),
            (429, ErrorType::RateLimited),
            (400, ErrorType::InvalidRequest),
            (502, ErrorType::ServiceUnavailable),
            (503, ErrorType::ServiceUnavailable),
        ];
        for (status, expected) in cases {
            assert_eq!(
                http(status).normalize("ALPHA", "AAPL").error_type(),
                expected,
                "HTTP {}",
                status
            );
        }
    }

    #[test]
    fn test_429_keeps_retry_after() {
        let error = http(429).normalize("ALPHA", "AAPL");
        assert_eq!(error.retry_after_seconds(), Some(20));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable_network_error() {
        let error = ClientError::Timeout.normalize("BETA", "AAPL");
        assert_eq!(error.error_type(), ErrorType::NetworkError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_frequency_note_is_minute_rate_limit() {
        let error = ClientError::ApiMessage(
            "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute and 500 calls per day."
                .to_string(),
        )
        .normalize("ALPHA", "AAPL");
        assert!(matches!(
            error,
            MarketDataError::RateLimited {
                daily_limit: false,
                ..
            }
        ));
    }

    #[test]
    fn test_daily_note_is_daily_cap() {
        let error = ClientError::ApiMessage(
            "Our standard API rate limit is 25 requests per day.".to_string(),
        )
        .normalize("ALPHA", "AAPL");
        assert!(!error.is_retryable());
        assert_eq!(error.error_type(), ErrorType::RateLimited);
    }

    #[test]
    fn test_invalid_api_call_is_symbol_not_found() {
        let error = ClientError::ApiMessage(
            "Invalid API call. Please retry or visit the documentation".to_string(),
        )
        .normalize("ALPHA", "ZZZZ");
        assert!(matches!(error, MarketDataError::SymbolNotFound { ref symbol, .. } if symbol == "ZZZZ"));
    }
}
