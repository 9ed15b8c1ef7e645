//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent cascading failures
//! when a provider is experiencing issues. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are rejected without calling it.
//! - **HalfOpen**: Exactly one trial request at a time tests recovery.
//!
//! The circuit breaker is in-memory and resets on application restart.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{seconds_until, to_delta, Clock};
use crate::errors::MarketDataError;
use crate::models::ProviderId;
use crate::provider::duration_millis;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are rejected.
    Open,
    /// Testing recovery - one trial request at a time.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Consecutive failures inside the monitoring period.
    failure_count: u32,
    /// Consecutive successes in HalfOpen state.
    half_open_successes: u32,
    last_failure: Option<DateTime<Utc>>,
    /// When an Open circuit admits its next trial.
    next_attempt: Option<DateTime<Utc>>,
    /// A HalfOpen trial call is running.
    trial_in_flight: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure: None,
            next_attempt: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before admitting a trial request.
    #[serde(with = "duration_millis")]
    pub recovery_timeout: Duration,
    /// Consecutive HalfOpen successes needed to close the circuit.
    pub success_threshold: u32,
    /// A failure older than this no longer counts towards the threshold.
    #[serde(with = "duration_millis")]
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            monitoring_period: Duration::from_secs(300),
        }
    }
}

/// Point-in-time view of one provider's circuit.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// Per-provider circuit breaker.
///
/// Thread-safe circuit breaker that tracks failures per provider
/// and prevents requests to failing providers.
pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    /// Per-provider circuit states.
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

/// Admission granted by [`CircuitBreaker::acquire`].
///
/// Dropping the permit without reporting an outcome (e.g. the call future
/// was cancelled) releases a HalfOpen trial slot without changing state.
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    provider: ProviderId,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(&self.provider);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(&self.provider);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            let mut circuits = self.breaker.lock_circuits();
            if let Some(circuit) = circuits.get_mut(self.provider.as_ref()) {
                circuit.trial_in_flight = false;
            }
        }
    }
}

/// Whether an error says something about the provider's health.
///
/// A provider that answers "no such symbol" or "bad request" is alive.
fn is_provider_fault(error: &MarketDataError) -> Option<bool> {
    match error.root() {
        MarketDataError::Cancelled { .. } => None,
        MarketDataError::SymbolNotFound { .. } | MarketDataError::InvalidRequest { .. } => {
            Some(false)
        }
        _ => Some(true),
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            clock,
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn open_error(provider: &ProviderId, retry_after_seconds: u64) -> MarketDataError {
        MarketDataError::CircuitOpen {
            provider: provider.to_string(),
            retry_after_seconds,
        }
    }

    /// Ask for permission to call a provider.
    ///
    /// Handles the Open -> HalfOpen transition once the recovery timeout has
    /// elapsed. While HalfOpen, only one permit is outstanding at a time;
    /// other callers are rejected immediately rather than queued.
    pub fn acquire(&self, provider: &ProviderId) -> Result<CircuitPermit<'_>, MarketDataError> {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        if circuit.state == CircuitState::Open {
            let next_attempt = circuit.next_attempt.unwrap_or(now);
            if now < next_attempt {
                return Err(Self::open_error(provider, seconds_until(now, next_attempt)));
            }
            info!(
                "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                provider
            );
            circuit.state = CircuitState::HalfOpen;
            circuit.half_open_successes = 0;
            circuit.trial_in_flight = false;
        }

        let trial = circuit.state == CircuitState::HalfOpen;
        if trial {
            if circuit.trial_in_flight {
                debug!(
                    "Circuit breaker: trial already in flight for '{}', rejecting",
                    provider
                );
                return Err(Self::open_error(provider, 1));
            }
            circuit.trial_in_flight = true;
        }

        Ok(CircuitPermit {
            breaker: self,
            provider: provider.clone(),
            trial,
            settled: false,
        })
    }

    /// Run `operation` under the provider's circuit.
    ///
    /// Returns [`MarketDataError::CircuitOpen`] without running the operation
    /// when the circuit rejects the call; otherwise returns the operation's
    /// own result unmodified.
    pub async fn execute<T, F, Fut>(
        &self,
        provider: &ProviderId,
        operation: F,
    ) -> Result<T, MarketDataError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let permit = self.acquire(provider)?;
        let result = operation().await;

        match &result {
            Ok(_) => permit.success(),
            Err(error) => match is_provider_fault(error) {
                Some(true) => permit.failure(),
                Some(false) => permit.success(),
                None => drop(permit),
            },
        }
        result
    }

    /// Record a successful request for a provider.
    ///
    /// In Closed state: resets failure count.
    /// In HalfOpen state: increments success count, may close circuit.
    pub fn record_success(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                circuit.trial_in_flight = false;
                circuit.half_open_successes += 1;
                debug!(
                    "Circuit breaker: success for '{}' in HalfOpen ({}/{})",
                    provider, circuit.half_open_successes, self.config.success_threshold
                );

                if circuit.half_open_successes >= self.config.success_threshold {
                    info!(
                        "Circuit breaker: closing circuit for '{}' after {} successes",
                        provider, circuit.half_open_successes
                    );
                    *circuit = Circuit::new();
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
                debug!(
                    "Circuit breaker: late success for '{}' while Open, ignoring",
                    provider
                );
            }
        }
    }

    /// Record a failed request for a provider.
    ///
    /// Failures older than the monitoring period stop counting. In HalfOpen
    /// state, any failure immediately reopens the circuit.
    pub fn record_failure(&self, provider: &ProviderId) {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        if let Some(last) = circuit.last_failure {
            if now - last > to_delta(self.config.monitoring_period) {
                circuit.failure_count = 0;
            }
        }
        circuit.failure_count += 1;
        circuit.last_failure = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        provider, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.next_attempt = Some(now + to_delta(self.config.recovery_timeout));
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failure in HalfOpen",
                    provider
                );
                circuit.state = CircuitState::Open;
                circuit.half_open_successes = 0;
                circuit.trial_in_flight = false;
                circuit.next_attempt = Some(now + to_delta(self.config.recovery_timeout));
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
            }
        }
    }

    /// Get the current state for a provider.
    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        self.lock_circuits()
            .get(provider.as_ref())
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the full circuit state for a provider.
    pub fn snapshot(&self, provider: &ProviderId) -> CircuitSnapshot {
        let circuits = self.lock_circuits();
        match circuits.get(provider.as_ref()) {
            Some(circuit) => Self::snapshot_of(provider.as_ref(), circuit),
            None => Self::snapshot_of(provider.as_ref(), &Circuit::new()),
        }
    }

    fn snapshot_of(provider: &str, circuit: &Circuit) -> CircuitSnapshot {
        CircuitSnapshot {
            provider: provider.to_string(),
            state: circuit.state,
            failure_count: circuit.failure_count,
            last_failure_time: circuit.last_failure,
            next_attempt_time: circuit.next_attempt,
        }
    }

    /// Reset the circuit for a provider to Closed state.
    pub fn reset(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        if let Some(circuit) = circuits.get_mut(provider.as_ref()) {
            info!(
                "Circuit breaker: manually resetting circuit for '{}'",
                provider
            );
            *circuit = Circuit::new();
        }
    }

    /// Reset all circuits to their initial state.
    pub fn reset_all(&self) {
        self.lock_circuits().clear();
        info!("Circuit breaker: all circuits reset");
    }

    /// Snapshots for all tracked providers, sorted by provider id.
    pub fn metrics(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.lock_circuits();
        let mut snapshots: Vec<_> = circuits
            .iter()
            .map(|(provider, circuit)| Self::snapshot_of(provider, circuit))
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }
}
