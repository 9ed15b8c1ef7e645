//! Provider orchestrator for resilient market data fetching.
//!
//! The orchestrator owns the fetch contract and wires the resilience
//! components together:
//! - Provider ordering from health, explicit or persisted preference, and
//!   load balancing between equally healthy providers
//! - Rate limiting, circuit breaking and retries around every provider call
//! - Point validation, range clipping and newest-first ordering
//! - Fallback to the next provider, with notifications and diagnostics
//! - Optional cross-checking of two providers through the reconciler

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    CircuitBreaker, FetchDiagnostics, ProviderHealthTracker, ProviderRecord, QuoteValidator,
    RateLimiter, RetryOptions, RetryScheduler,
};
use crate::clock::Clock;
use crate::config::FeedConfig;
use crate::errors::{DefaultErrorClassifier, ErrorType, MarketDataError};
use crate::events::{NoOpNotificationSink, Notification, NotificationSink};
use crate::models::{
    ConsistencyReport, PricePoint, ProviderId, ProviderPreference, QuoteRequest, SeriesMetadata,
    TimeSeries,
};
use crate::provider::{duration_millis, ProviderClient, ProviderSeries, RetryPolicy};
use crate::reconcile::ConsistencyReconciler;
use crate::storage::{InMemoryStorage, Storage, StorageError, PROVIDER_PREFERENCE_KEY};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Per-call timeout used when the request does not set one.
    #[serde(with = "duration_millis")]
    pub default_timeout: Duration,
    /// Alternate between the two healthiest providers when they are close.
    pub load_balancing: bool,
    /// Health difference below which two providers count as close.
    pub closeness_threshold: u8,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            load_balancing: true,
            closeness_threshold: 10,
        }
    }
}

/// A served series plus the cross-check against a second provider, when one
/// could be made.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditedSeries {
    pub series: TimeSeries,
    pub report: Option<ConsistencyReport>,
}

/// The shared resilience components, constructed once and injected.
#[derive(Clone)]
pub struct Resilience {
    pub rate_limiter: Arc<RateLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub retry: Arc<RetryScheduler>,
    pub health: Arc<ProviderHealthTracker>,
}

impl Resilience {
    pub fn from_config(clock: Arc<dyn Clock>, config: &FeedConfig) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(clock.clone())),
            circuit_breaker: Arc::new(CircuitBreaker::with_config(
                clock.clone(),
                config.circuit_breaker.clone(),
            )),
            retry: Arc::new(RetryScheduler::new(
                clock.clone(),
                Arc::new(DefaultErrorClassifier),
            )),
            health: Arc::new(ProviderHealthTracker::with_config(
                clock,
                config.health.clone(),
            )),
        }
    }
}

/// Whether a fetch serves the caller or cross-checks another fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FetchRole {
    Serve,
    Audit,
}

/// Errors that say something about the request rather than the provider.
fn is_caller_error(error: &MarketDataError) -> bool {
    matches!(
        error.error_type(),
        ErrorType::InvalidRequest | ErrorType::SymbolNotFound | ErrorType::Cancelled
    )
}

/// Orchestrates market data fetching across providers.
pub struct ProviderOrchestrator {
    providers: HashMap<&'static str, Arc<dyn ProviderClient>>,
    clock: Arc<dyn Clock>,
    resilience: Resilience,
    validator: QuoteValidator,
    reconciler: ConsistencyReconciler,
    notifications: Arc<dyn NotificationSink>,
    storage: Arc<dyn Storage>,
    config: OrchestratorConfig,
    retry_override: Option<RetryPolicy>,
    preference: Mutex<ProviderPreference>,
    /// Top candidate of the previous request, for load balancing.
    last_top: Mutex<Option<String>>,
    /// Request-level cancellation, keyed by operation id.
    requests: Mutex<HashMap<String, CancellationToken>>,
}

/// Unregisters a request id however `run_tracked` exits, including when the
/// caller drops the future.
struct RequestGuard<'a> {
    requests: &'a Mutex<HashMap<String, CancellationToken>>,
    operation_id: &'a str,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        ProviderOrchestrator::lock(self.requests, "requests").remove(self.operation_id);
    }
}

impl ProviderOrchestrator {
    /// Create an orchestrator with default configuration.
    pub fn new(providers: Vec<Arc<dyn ProviderClient>>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(providers, clock, &FeedConfig::default())
    }

    /// Create an orchestrator whose components are built from `config`.
    pub fn with_config(
        providers: Vec<Arc<dyn ProviderClient>>,
        clock: Arc<dyn Clock>,
        config: &FeedConfig,
    ) -> Self {
        let resilience = Resilience::from_config(clock.clone(), config);
        Self::from_parts(providers, clock, resilience, config)
    }

    /// Create an orchestrator around existing components.
    ///
    /// Providers the health tracker does not know yet are registered with
    /// their declared name and priority; every provider's rate limit is
    /// configured from `config` or, failing that, its own declaration.
    pub fn from_parts(
        providers: Vec<Arc<dyn ProviderClient>>,
        clock: Arc<dyn Clock>,
        resilience: Resilience,
        config: &FeedConfig,
    ) -> Self {
        let mut by_id = HashMap::new();
        for provider in providers {
            let id = provider.id();
            let provider_id: ProviderId = Cow::Borrowed(id);
            let limit = config
                .rate_limit
                .clone()
                .unwrap_or_else(|| provider.rate_limit());
            resilience.rate_limiter.configure(&provider_id, limit);

            if resilience.health.record(id).is_none() {
                resilience.health.register(ProviderRecord::new(
                    id,
                    provider.display_name(),
                    provider.priority(),
                ));
            }
            if by_id.insert(id, provider).is_some() {
                warn!("Duplicate provider id '{}', keeping the last one", id);
            }
        }

        Self {
            providers: by_id,
            clock,
            resilience,
            validator: QuoteValidator::with_config(config.validator.clone()),
            reconciler: ConsistencyReconciler::with_config(config.reconciler.clone()),
            notifications: Arc::new(NoOpNotificationSink),
            storage: Arc::new(InMemoryStorage::new()),
            config: config.orchestrator.clone(),
            retry_override: config.retry.clone(),
            preference: Mutex::new(ProviderPreference::Auto),
            last_top: Mutex::new(None),
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn health(&self) -> &ProviderHealthTracker {
        &self.resilience.health
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.resilience.circuit_breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.resilience.rate_limiter
    }

    pub fn retry_scheduler(&self) -> &RetryScheduler {
        &self.resilience.retry
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| {
            warn!("Orchestrator {} mutex was poisoned, recovering", name);
            poisoned.into_inner()
        })
    }

    // ------------------------------------------------------------------
    // Preference
    // ------------------------------------------------------------------

    /// Preference used when a request does not carry one.
    pub fn preferred_provider(&self) -> ProviderPreference {
        Self::lock(&self.preference, "preference").clone()
    }

    /// Set and persist the default preference.
    pub fn set_preferred_provider(
        &self,
        preference: ProviderPreference,
    ) -> Result<(), StorageError> {
        let blob = serde_json::to_string(&preference)?;
        self.storage.set(PROVIDER_PREFERENCE_KEY, &blob)?;
        info!("Preferred provider set to {:?}", preference);
        *Self::lock(&self.preference, "preference") = preference;
        Ok(())
    }

    /// Persist health records and the preference.
    pub fn persist_state(&self) -> Result<(), StorageError> {
        self.resilience.health.persist(self.storage.as_ref())?;
        let blob = serde_json::to_string(&self.preferred_provider())?;
        self.storage.set(PROVIDER_PREFERENCE_KEY, &blob)
    }

    /// Load health records and the preference from storage.
    pub fn restore_state(&self) -> Result<(), StorageError> {
        self.resilience.health.restore(self.storage.as_ref())?;
        if let Some(blob) = self.storage.get(PROVIDER_PREFERENCE_KEY)? {
            let preference: ProviderPreference = serde_json::from_str(&blob)?;
            debug!("Restored preferred provider {:?}", preference);
            *Self::lock(&self.preference, "preference") = preference;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Candidate ordering
    // ------------------------------------------------------------------

    /// Available providers we hold a client for, healthiest first.
    fn ranked(&self, exclude: Option<&str>) -> Vec<ProviderRecord> {
        self.resilience
            .health
            .available_providers()
            .into_iter()
            .filter(|record| self.providers.contains_key(record.id.as_str()))
            .filter(|record| Some(record.id.as_str()) != exclude)
            .collect()
    }

    /// Order providers for one request.
    fn candidates(&self, request: &QuoteRequest) -> Vec<String> {
        let mut ranked = self.ranked(None);

        // A per-request preference wins; `Auto` there means no preference at all.
        let preference = match &request.preferred_provider {
            Some(preference) => preference.clone(),
            None => self.preferred_provider(),
        };

        let mut preference_applied = false;
        if let Some(preferred) = preference.provider_id() {
            match ranked.iter().position(|record| record.id == preferred) {
                Some(index) => {
                    let record = ranked.remove(index);
                    ranked.insert(0, record);
                    preference_applied = true;
                }
                None => debug!(
                    "Preferred provider '{}' is not available, ranking by health",
                    preferred
                ),
            }
        }

        let mut last_top = Self::lock(&self.last_top, "load balancing");
        if !preference_applied && self.config.load_balancing && ranked.len() >= 2 {
            let gap = ranked[0].health_score.abs_diff(ranked[1].health_score);
            if gap < self.config.closeness_threshold
                && last_top.as_deref() == Some(ranked[0].id.as_str())
            {
                debug!(
                    "Load balancing: '{}' and '{}' are within {} health, alternating",
                    ranked[0].id, ranked[1].id, gap
                );
                ranked.swap(0, 1);
            }
        }
        *last_top = ranked.first().map(|record| record.id.clone());
        drop(last_top);

        let mut ids: Vec<String> = ranked.into_iter().map(|record| record.id).collect();
        if !request.fallback_enabled() {
            ids.truncate(1);
        }
        ids
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    /// Fetch a time series, falling back across providers.
    pub async fn get_data(&self, request: &QuoteRequest) -> Result<TimeSeries, MarketDataError> {
        let operation_id = Uuid::new_v4().to_string();
        self.get_data_with_operation_id(request, &operation_id)
            .await
    }

    /// Like [`get_data`](Self::get_data), under a caller-chosen operation id
    /// that [`cancel`](Self::cancel) accepts.
    pub async fn get_data_with_operation_id(
        &self,
        request: &QuoteRequest,
        operation_id: &str,
    ) -> Result<TimeSeries, MarketDataError> {
        let symbol = request.validate()?;
        let candidates = self.candidates(request);
        self.run_tracked(operation_id, |token| {
            self.fetch_from(request, &symbol, candidates, operation_id, token, FetchRole::Serve)
        })
        .await
    }

    /// Fetch a series and cross-check it against the best other provider.
    ///
    /// A failed cross-check is logged and yields `report: None`; only the
    /// primary fetch can fail the call.
    pub async fn get_audited_data(
        &self,
        request: &QuoteRequest,
    ) -> Result<AuditedSeries, MarketDataError> {
        let series = self.get_data(request).await?;
        let primary = series.metadata.provider.to_string();

        let others: Vec<String> = self
            .ranked(Some(&primary))
            .into_iter()
            .map(|record| record.id)
            .collect();
        if others.is_empty() {
            info!(
                "No second provider available to cross-check {} from '{}'",
                series.symbol, primary
            );
            return Ok(AuditedSeries {
                series,
                report: None,
            });
        }

        let operation_id = Uuid::new_v4().to_string();
        let audit = self
            .run_tracked(&operation_id, |token| {
                self.fetch_from(
                    request,
                    &series.symbol,
                    others,
                    &operation_id,
                    token,
                    FetchRole::Audit,
                )
            })
            .await;

        let report = match audit {
            Ok(other) => Some(self.reconciler.reconcile(&series, &other, &series.symbol)),
            Err(e) => {
                warn!("Cross-check for {} failed: {}", series.symbol, e);
                None
            }
        };
        Ok(AuditedSeries { series, report })
    }

    /// Cancel an in-flight request.
    ///
    /// The pending retry wait (if any) is cleared and no further provider is
    /// tried; the request fails with `CANCELLED`. Returns `false` when no
    /// request with this id is running.
    pub fn cancel(&self, operation_id: &str) -> bool {
        let token = Self::lock(&self.requests, "requests")
            .get(operation_id)
            .cloned();
        let Some(token) = token else {
            return false;
        };
        token.cancel();
        for provider in self.providers.keys() {
            self.resilience
                .retry
                .cancel(&Self::retry_operation_id(operation_id, provider));
        }
        info!("Request '{}' cancelled", operation_id);
        true
    }

    fn retry_operation_id(operation_id: &str, provider: &str) -> String {
        format!("{}:{}", operation_id, provider)
    }

    /// Register `operation_id` for cancellation while `run` executes.
    async fn run_tracked<T, F, Fut>(&self, operation_id: &str, run: F) -> Result<T, MarketDataError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<T, MarketDataError>>,
    {
        let token = CancellationToken::new();
        {
            let mut requests = Self::lock(&self.requests, "requests");
            if requests.contains_key(operation_id) {
                return Err(MarketDataError::invalid_request(format!(
                    "Operation '{}' is already in flight",
                    operation_id
                )));
            }
            requests.insert(operation_id.to_string(), token.clone());
        }

        let _guard = RequestGuard {
            requests: &self.requests,
            operation_id,
        };
        run(token).await
    }

    fn retry_options(&self, provider: &dyn ProviderClient) -> RetryOptions {
        let policy = self
            .retry_override
            .clone()
            .unwrap_or_else(|| provider.retry_policy());
        RetryOptions::from(&policy)
    }

    /// Try `candidates` in order until one serves the request.
    async fn fetch_from(
        &self,
        request: &QuoteRequest,
        symbol: &str,
        candidates: Vec<String>,
        operation_id: &str,
        token: CancellationToken,
        role: FetchRole,
    ) -> Result<TimeSeries, MarketDataError> {
        let request_time = self.clock.now();
        let mut diagnostics = FetchDiagnostics::new();
        let mut last_error: Option<MarketDataError> = None;

        let clients: Vec<Arc<dyn ProviderClient>> = candidates
            .iter()
            .filter_map(|id| self.providers.get(id.as_str()).cloned())
            .collect();
        if clients.is_empty() {
            warn!("No providers available for {}", symbol);
            return Err(MarketDataError::NoProvidersAvailable);
        }
        let first_choice = clients[0].id();

        for client in clients {
            if token.is_cancelled() {
                return Err(MarketDataError::Cancelled {
                    operation_id: operation_id.to_string(),
                });
            }

            let provider_id: ProviderId = Cow::Borrowed(client.id());
            debug!("Fetching {} {} from '{}'", symbol, request.timeframe, provider_id);

            let retry_id = Self::retry_operation_id(operation_id, client.id());
            let result = self
                .resilience
                .retry
                .execute_with_retry(&retry_id, self.retry_options(client.as_ref()), |_| {
                    self.attempt(client.as_ref(), &provider_id, symbol, request)
                })
                .await;

            match result {
                Ok(raw) => {
                    let fallback_used = client.id() != first_choice;
                    let series = self.build_series(
                        client.as_ref(),
                        symbol,
                        request,
                        raw,
                        request_time,
                        fallback_used,
                    );
                    self.report_success(&series, role);
                    diagnostics.record_success(provider_id);
                    debug!("Fetch diagnostics for {}: {}", symbol, diagnostics.summary());
                    return Ok(series);
                }
                Err(error) if is_caller_error(&error) => {
                    debug!(
                        "'{}' rejected {} with a caller error, not falling back: {}",
                        provider_id, symbol, error
                    );
                    return Err(error);
                }
                Err(error) => {
                    warn!("Provider '{}' failed for {}: {}", provider_id, symbol, error);
                    let disabled = self
                        .resilience
                        .health
                        .record_failure(client.id(), &error.to_string());
                    self.notifications.emit(Notification::DataSourceFailure {
                        provider: client.id().to_string(),
                        symbol: symbol.to_string(),
                        error_type: error.error_type(),
                        message: error.to_string(),
                        disabled,
                        at: self.clock.now(),
                    });
                    diagnostics.record_error(provider_id, &error);
                    last_error = Some(error);
                }
            }
        }

        info!("All providers failed for {}: {}", symbol, diagnostics.summary());
        match last_error {
            Some(last) => Err(MarketDataError::AllProvidersFailed {
                last: Box::new(last),
                attempts: diagnostics.into_attempts(),
            }),
            None => Err(MarketDataError::NoProvidersAvailable),
        }
    }

    /// One attempt: rate limiter, then circuit breaker, then the timed call.
    async fn attempt(
        &self,
        client: &dyn ProviderClient,
        provider_id: &ProviderId,
        symbol: &str,
        request: &QuoteRequest,
    ) -> Result<ProviderSeries, MarketDataError> {
        self.resilience
            .rate_limiter
            .try_acquire(provider_id)
            .into_result(provider_id)?;

        self.resilience
            .circuit_breaker
            .execute(provider_id, || self.call_provider(client, symbol, request))
            .await
    }

    /// Call the provider with a timeout, normalize its failure, and keep
    /// only points that pass validation.
    async fn call_provider(
        &self,
        client: &dyn ProviderClient,
        symbol: &str,
        request: &QuoteRequest,
    ) -> Result<ProviderSeries, MarketDataError> {
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);

        let outcome = tokio::select! {
            biased;
            result = client.fetch_series(symbol, request) => {
                result.map_err(|e| e.normalize(client.id(), symbol))
            }
            _ = self.clock.sleep(timeout) => Err(MarketDataError::Network {
                provider: client.id().to_string(),
                message: format!("Request timed out after {}ms", timeout.as_millis()),
                timed_out: true,
            }),
        };
        let mut raw = outcome?;

        let received = raw.points.len();
        if received == 0 {
            return Err(MarketDataError::ValidationFailed {
                provider: client.id().to_string(),
                message: format!("No data points returned for {}", symbol),
            });
        }

        let (valid, invalid) = self
            .validator
            .validate_batch(client.id(), std::mem::take(&mut raw.points));
        for (point, error) in &invalid {
            warn!("Dropping bar at {} from '{}': {}", point.timestamp, client.id(), error);
        }
        if valid.is_empty() {
            return Err(MarketDataError::ValidationFailed {
                provider: client.id().to_string(),
                message: format!("All {} points failed validation", received),
            });
        }

        raw.points = valid;
        Ok(raw)
    }

    fn in_range(request: &QuoteRequest, point: &PricePoint) -> bool {
        let date = point.date();
        request.start_date.map_or(true, |start| date >= start)
            && request.end_date.map_or(true, |end| date <= end)
    }

    fn build_series(
        &self,
        client: &dyn ProviderClient,
        symbol: &str,
        request: &QuoteRequest,
        raw: ProviderSeries,
        request_time: DateTime<Utc>,
        fallback_used: bool,
    ) -> TimeSeries {
        let latest = raw.points.iter().map(|p| p.timestamp).max();
        let data = raw
            .points
            .into_iter()
            .filter(|point| Self::in_range(request, point))
            .collect();

        let mut series = TimeSeries {
            symbol: symbol.to_string(),
            timeframe: request.timeframe,
            data,
            metadata: SeriesMetadata {
                last_refreshed: raw.last_refreshed.or(latest).unwrap_or(request_time),
                time_zone: raw.time_zone.unwrap_or_else(|| "UTC".to_string()),
                data_source: client.display_name().to_string(),
                request_time,
                provider: Cow::Borrowed(client.id()),
                fallback_used,
            },
        };
        series.sort_newest_first();
        series
    }

    fn report_success(&self, series: &TimeSeries, role: FetchRole) {
        let provider: &str = &series.metadata.provider;
        let now = self.clock.now();

        match role {
            FetchRole::Serve => {
                let switch = self.resilience.health.record_success(provider);
                info!(
                    "'{}' served {} points for {}{}",
                    provider,
                    series.len(),
                    series.symbol,
                    if series.metadata.fallback_used {
                        " (fallback)"
                    } else {
                        ""
                    }
                );
                let mut notifications = vec![Notification::DataSourceSuccess {
                    provider: provider.to_string(),
                    symbol: series.symbol.clone(),
                    point_count: series.len(),
                    fallback_used: series.metadata.fallback_used,
                    at: now,
                }];
                notifications.extend(switch.map(|switch| switch.into_notification(now)));
                self.notifications.emit_batch(notifications);
            }
            FetchRole::Audit => {
                self.resilience.health.record_audit_success(provider);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::MockNotificationSink;
    use crate::models::Timeframe;
    use crate::provider::ClientError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        id: &'static str,
        fail_with: Option<u16>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn ok(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                fail_with: None,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(id: &'static str, status: u16) -> Arc<Self> {
            Arc::new(Self {
                id,
                fail_with: Some(status),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn fetch_series(
            &self,
            _symbol: &str,
            _request: &QuoteRequest,
        ) -> Result<ProviderSeries, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.fail_with {
                return Err(ClientError::Http {
                    status,
                    body: String::new(),
                    retry_after_seconds: None,
                });
            }
            let day = |d: u32| Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap();
            Ok(ProviderSeries::new(vec![
                PricePoint::ohlcv(day(4), dec!(100), dec!(101), dec!(99), dec!(100), dec!(1000)),
                PricePoint::ohlcv(day(6), dec!(102), dec!(103), dec!(101), dec!(102), dec!(1000)),
                PricePoint::ohlcv(day(5), dec!(101), dec!(102), dec!(100), dec!(101), dec!(1000)),
            ]))
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 8, 22, 0, 0).unwrap(),
        ))
    }

    fn orchestrator(providers: Vec<Arc<dyn ProviderClient>>) -> ProviderOrchestrator {
        ProviderOrchestrator::new(providers, clock())
    }

    #[tokio::test]
    async fn test_serves_from_first_provider() {
        let alpha = ScriptedProvider::ok("ALPHA");
        let beta = ScriptedProvider::ok("BETA");
        let orch = orchestrator(vec![alpha.clone(), beta.clone()]);

        let series = orch
            .get_data(&QuoteRequest::new("aapl", Timeframe::Daily))
            .await
            .unwrap();

        assert_eq!(series.symbol, "AAPL");
        assert_eq!(series.metadata.provider, "ALPHA");
        assert!(!series.metadata.fallback_used);
        assert_eq!(series.data[0].date().to_string(), "2024-03-06");
        assert_eq!(beta.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_symbol_never_reaches_providers() {
        let alpha = ScriptedProvider::ok("ALPHA");
        let orch = orchestrator(vec![alpha.clone()]);

        let error = orch
            .get_data(&QuoteRequest::new("not a ticker!", Timeframe::Daily))
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), ErrorType::InvalidRequest);
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_symbol_not_found_is_not_a_provider_failure() {
        let alpha = ScriptedProvider::failing("ALPHA", 404);
        let beta = ScriptedProvider::ok("BETA");
        let orch = orchestrator(vec![alpha.clone(), beta.clone()]);

        let error = orch
            .get_data(&QuoteRequest::new("ZZZZ", Timeframe::Daily))
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), ErrorType::SymbolNotFound);
        assert_eq!(beta.calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.health().record("ALPHA").unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_fallback_on_invalid_key() {
        let alpha = ScriptedProvider::failing("ALPHA", 401);
        let beta = ScriptedProvider::ok("BETA");
        let sink = Arc::new(MockNotificationSink::new());
        let orch = orchestrator(vec![alpha.clone(), beta.clone()]).with_notifications(sink.clone());

        let series = orch
            .get_data(&QuoteRequest::new("AAPL", Timeframe::Daily))
            .await
            .unwrap();

        assert_eq!(series.metadata.provider, "BETA");
        assert!(series.metadata.fallback_used);
        // Invalid keys are not retried.
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 1);
        let kinds: Vec<_> = sink
            .notifications()
            .iter()
            .map(|n| serde_json::to_value(n).unwrap()["kind"].clone())
            .collect();
        assert_eq!(kinds, vec!["data-source-failure", "data-source-success"]);
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let alpha = ScriptedProvider::failing("ALPHA", 401);
        let beta = ScriptedProvider::failing("BETA", 403);
        let orch = orchestrator(vec![alpha, beta]);

        let error = orch
            .get_data(&QuoteRequest::new("AAPL", Timeframe::Daily))
            .await
            .unwrap_err();

        assert!(error.is_all_providers_failed());
        assert_eq!(error.error_type(), ErrorType::InvalidApiKey);
        match error {
            MarketDataError::AllProvidersFailed { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts.iter().all(|a| !a.success));
            }
            other => panic!("expected AllProvidersFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_disabled_tries_one_provider() {
        let alpha = ScriptedProvider::failing("ALPHA", 401);
        let beta = ScriptedProvider::ok("BETA");
        let orch = orchestrator(vec![alpha, beta.clone()]);

        let error = orch
            .get_data(&QuoteRequest::new("AAPL", Timeframe::Daily).without_fallback())
            .await
            .unwrap_err();

        assert!(error.is_all_providers_failed());
        assert_eq!(beta.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_providers_available() {
        let alpha = ScriptedProvider::ok("ALPHA");
        let orch = orchestrator(vec![alpha]);
        orch.health().set_enabled("ALPHA", false);

        let error = orch
            .get_data(&QuoteRequest::new("AAPL", Timeframe::Daily))
            .await
            .unwrap_err();

        assert!(matches!(error, MarketDataError::NoProvidersAvailable));
        assert!(error.is_all_providers_failed());
        assert_eq!(error.error_type(), ErrorType::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_range_is_clipped() {
        let orch = orchestrator(vec![ScriptedProvider::ok("ALPHA")]);
        let start = chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let series = orch
            .get_data(&QuoteRequest::new("AAPL", Timeframe::Daily).with_range(start, start))
            .await
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series.data[0].date(), start);
    }

    #[test]
    fn test_load_balancing_alternates_close_providers() {
        let orch = orchestrator(vec![ScriptedProvider::ok("ALPHA"), ScriptedProvider::ok("BETA")]);
        let request = QuoteRequest::new("AAPL", Timeframe::Daily);

        assert_eq!(orch.candidates(&request), vec!["ALPHA", "BETA"]);
        assert_eq!(orch.candidates(&request), vec!["BETA", "ALPHA"]);
        assert_eq!(orch.candidates(&request), vec!["ALPHA", "BETA"]);
    }

    #[test]
    fn test_explicit_preference_beats_alternation() {
        let orch = orchestrator(vec![ScriptedProvider::ok("ALPHA"), ScriptedProvider::ok("BETA")]);
        let request = QuoteRequest::new("AAPL", Timeframe::Daily)
            .with_preference(ProviderPreference::provider("ALPHA"));

        assert_eq!(orch.candidates(&request), vec!["ALPHA", "BETA"]);
        assert_eq!(orch.candidates(&request), vec!["ALPHA", "BETA"]);
    }

    #[test]
    fn test_persisted_preference_and_auto_override() {
        let orch = orchestrator(vec![ScriptedProvider::ok("ALPHA"), ScriptedProvider::ok("BETA")]);
        orch.set_preferred_provider(ProviderPreference::provider("BETA"))
            .unwrap();

        let request = QuoteRequest::new("AAPL", Timeframe::Daily);
        assert_eq!(orch.candidates(&request), vec!["BETA", "ALPHA"]);
        assert_eq!(orch.candidates(&request), vec!["BETA", "ALPHA"]);

        // An explicit `Auto` on the request ignores the persisted preference.
        let auto = request.with_preference(ProviderPreference::Auto);
        assert_eq!(orch.candidates(&auto), vec!["ALPHA", "BETA"]);
    }

    #[test]
    fn test_state_round_trips_through_storage() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let providers = || -> Vec<Arc<dyn ProviderClient>> {
            vec![ScriptedProvider::ok("ALPHA"), ScriptedProvider::ok("BETA")]
        };

        let first = orchestrator(providers()).with_storage(storage.clone());
        first.health().record_failure("ALPHA", "HTTP 503");
        first
            .set_preferred_provider(ProviderPreference::provider("BETA"))
            .unwrap();
        first.persist_state().unwrap();

        let second = orchestrator(providers()).with_storage(storage);
        second.restore_state().unwrap();
        assert_eq!(
            second.preferred_provider(),
            ProviderPreference::provider("BETA")
        );
        assert_eq!(second.health().record("ALPHA").unwrap().health_score, 90);
    }

    #[test]
    fn test_cancel_unknown_request() {
        let orch = orchestrator(vec![ScriptedProvider::ok("ALPHA")]);
        assert!(!orch.cancel("missing"));
    }
}
