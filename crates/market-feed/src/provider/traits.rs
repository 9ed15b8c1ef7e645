//! Provider client trait definition.
//!
//! This module defines the `ProviderClient` capability that wraps a single
//! upstream market data source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{PricePoint, QuoteRequest};

use super::capabilities::{RateLimit, RetryPolicy};
use super::client_error::ClientError;

/// Raw series as returned by a provider, before validation and ordering.
#[derive(Clone, Debug, Default)]
pub struct ProviderSeries {
    /// Bars in whatever order the provider sent them.
    pub points: Vec<PricePoint>,

    /// When the provider last refreshed this symbol, if it says so.
    pub last_refreshed: Option<DateTime<Utc>>,

    /// Exchange time zone reported by the provider.
    pub time_zone: Option<String>,
}

impl ProviderSeries {
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self {
            points,
            last_refreshed: None,
            time_zone: None,
        }
    }
}

/// Trait for upstream market data sources.
///
/// Implement this trait to plug a provider into the orchestrator. The wire
/// protocol stays inside the implementation; the orchestrator only sees
/// [`ProviderSeries`] on success and [`ClientError`] on failure, which it
/// normalizes before anything crosses its boundary.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use market_feed::provider::{ClientError, ProviderClient, ProviderSeries, RateLimit};
///
/// struct MyProvider {
///     http: reqwest::Client,
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl ProviderClient for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn rate_limit(&self) -> RateLimit {
///         RateLimit { requests_per_minute: 5, requests_per_day: 500 }
///     }
///
///     async fn fetch_series(&self, symbol: &str, request: &QuoteRequest)
///         -> Result<ProviderSeries, ClientError> {
///         let body = self.http.get(url).send().await?.error_for_status()?;
///         // ... parse into PricePoints
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Used for logging, rate limiting, circuit breaker and health tracking.
    fn id(&self) -> &'static str;

    /// Human-readable name, reported as `dataSource` in series metadata.
    fn display_name(&self) -> &str {
        self.id()
    }

    /// Configured priority. Lower values = higher priority; only used to
    /// break ties between equally healthy providers.
    fn priority(&self) -> i32 {
        10
    }

    /// Request budget enforced by the rate limiter.
    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Retry policy applied to this provider's calls.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Fetch bars for an already-validated, upper-cased `symbol`.
    async fn fetch_series(
        &self,
        symbol: &str,
        request: &QuoteRequest,
    ) -> Result<ProviderSeries, ClientError>;
}
