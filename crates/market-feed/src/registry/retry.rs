//! Retry scheduling with exponential backoff and cooperative cancellation.
//!
//! Every logical operation gets an id, a [`RetryContext`] visible to callers
//! while it runs, and its own cancellation token. Waits between attempts go
//! through the injected [`Clock`] so tests run on virtual time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::clock::{to_delta, Clock};
use crate::errors::{ErrorClassifier, MarketDataError};
use crate::provider::RetryPolicy;

pub type ProgressCallback = Arc<dyn Fn(&RetryProgress) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&MarketDataError, u32) + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Progress notifications emitted between attempts.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum RetryProgress {
    /// Attempt `attempt` failed; the next one fires after `delay`.
    #[serde(rename_all = "camelCase")]
    Waiting {
        operation_id: String,
        attempt: u32,
        next_attempt: u32,
        max_attempts: u32,
        #[serde(with = "crate::provider::duration_millis")]
        delay: Duration,
        message: String,
    },
    /// Attempt `attempt` is starting.
    #[serde(rename_all = "camelCase")]
    Retrying {
        operation_id: String,
        attempt: u32,
        max_attempts: u32,
    },
}

/// State of one in-flight operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryContext {
    pub operation_id: String,
    /// 1-based number of the current (or last started) attempt.
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

/// Per-call retry settings and hooks.
#[derive(Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub on_progress: Option<ProgressCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_success: Option<SuccessCallback>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for RetryOptions {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            on_progress: None,
            on_error: None,
            on_success: None,
        }
    }
}

impl RetryOptions {
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn with_on_success(mut self, callback: SuccessCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn emit(&self, progress: RetryProgress) {
        if let Some(callback) = &self.on_progress {
            callback(&progress);
        }
    }
}

/// Human countdown for a pending retry.
fn countdown_message(delay: Duration, next_attempt: u32, max_attempts: u32) -> String {
    let wait = if delay < Duration::from_secs(1) {
        format!("{}ms", delay.as_millis())
    } else {
        let seconds = delay.as_secs_f64().ceil() as u64;
        if seconds == 1 {
            "1 second".to_string()
        } else {
            format!("{} seconds", seconds)
        }
    };
    format!(
        "Retrying in {} (attempt {} of {})",
        wait, next_attempt, max_attempts
    )
}

struct TrackedOperation {
    context: RetryContext,
    token: CancellationToken,
}

/// Runs operations with retries, one independent state per operation id.
pub struct RetryScheduler {
    clock: Arc<dyn Clock>,
    classifier: Arc<dyn ErrorClassifier>,
    operations: Mutex<HashMap<String, TrackedOperation>>,
}

/// Removes the operation's context however `execute_with_retry` exits.
struct OperationGuard<'a> {
    scheduler: &'a RetryScheduler,
    operation_id: &'a str,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock_operations().remove(self.operation_id);
    }
}

impl RetryScheduler {
    pub fn new(clock: Arc<dyn Clock>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            clock,
            classifier,
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the operations mutex, recovering from poison if necessary.
    fn lock_operations(&self) -> MutexGuard<'_, HashMap<String, TrackedOperation>> {
        self.operations.lock().unwrap_or_else(|poisoned| {
            warn!("Retry scheduler mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn register(
        &self,
        operation_id: &str,
        max_attempts: u32,
    ) -> Result<CancellationToken, MarketDataError> {
        let mut operations = self.lock_operations();
        if operations.contains_key(operation_id) {
            return Err(MarketDataError::invalid_request(format!(
                "Operation '{}' is already in flight",
                operation_id
            )));
        }
        let token = CancellationToken::new();
        operations.insert(
            operation_id.to_string(),
            TrackedOperation {
                context: RetryContext {
                    operation_id: operation_id.to_string(),
                    attempt: 0,
                    max_attempts,
                    next_retry_at: None,
                    cancelled: false,
                },
                token: token.clone(),
            },
        );
        Ok(token)
    }

    fn update_context(&self, operation_id: &str, update: impl FnOnce(&mut RetryContext)) {
        if let Some(operation) = self.lock_operations().get_mut(operation_id) {
            update(&mut operation.context);
        }
    }

    fn cancelled_error(operation_id: &str) -> MarketDataError {
        MarketDataError::Cancelled {
            operation_id: operation_id.to_string(),
        }
    }

    /// Run `operation` until it succeeds, fails terminally, runs out of
    /// attempts, or is cancelled.
    ///
    /// `operation` receives the 1-based attempt number. Terminal failures are
    /// wrapped in [`MarketDataError::Exhausted`] with the number of attempts
    /// made; cancellation yields a bare [`MarketDataError::Cancelled`].
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        options: RetryOptions,
        mut operation: F,
    ) -> Result<T, MarketDataError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let max_attempts = options.max_attempts();
        let token = self.register(operation_id, max_attempts)?;
        let _guard = OperationGuard {
            scheduler: self,
            operation_id,
        };

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return Err(Self::cancelled_error(operation_id));
            }

            self.update_context(operation_id, |context| {
                context.attempt = attempt;
                context.next_retry_at = None;
            });
            if attempt > 1 {
                options.emit(RetryProgress::Retrying {
                    operation_id: operation_id.to_string(),
                    attempt,
                    max_attempts,
                });
            }

            let result = operation(attempt).await;

            // A result that lands after cancellation is discarded.
            if token.is_cancelled() {
                debug!(
                    "Operation '{}' cancelled during attempt {}, discarding result",
                    operation_id, attempt
                );
                return Err(Self::cancelled_error(operation_id));
            }

            let error = match result {
                Ok(value) => {
                    if let Some(callback) = &options.on_success {
                        callback(attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if let Some(callback) = &options.on_error {
                callback(&error, attempt);
            }

            let classification = self.classifier.classify(&error);
            if !classification.retryable || attempt == max_attempts {
                debug!(
                    "Operation '{}' giving up after attempt {}/{}: {}",
                    operation_id, attempt, max_attempts, error
                );
                return Err(MarketDataError::Exhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            // A wait dictated by the error is honoured in full; only computed
            // backoff is capped.
            let delay = classification
                .suggested_delay
                .unwrap_or_else(|| options.backoff(attempt));
            let next_retry_at = self.clock.now() + to_delta(delay);
            self.update_context(operation_id, |context| {
                context.next_retry_at = Some(next_retry_at);
            });

            info!(
                "Operation '{}' attempt {}/{} failed ({}), retrying in {:?}",
                operation_id, attempt, max_attempts, error, delay
            );
            options.emit(RetryProgress::Waiting {
                operation_id: operation_id.to_string(),
                attempt,
                next_attempt: attempt + 1,
                max_attempts,
                delay,
                message: countdown_message(delay, attempt + 1, max_attempts),
            });

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Operation '{}' cancelled while waiting", operation_id);
                    return Err(Self::cancelled_error(operation_id));
                }
                _ = self.clock.sleep(delay) => {}
            }
        }

        // max_attempts >= 1, so the loop always returns.
        Err(Self::cancelled_error(operation_id))
    }

    /// Cancel an in-flight operation.
    ///
    /// Returns `false` when no operation with this id is running.
    pub fn cancel(&self, operation_id: &str) -> bool {
        let mut operations = self.lock_operations();
        match operations.get_mut(operation_id) {
            Some(operation) => {
                operation.context.cancelled = true;
                operation.context.next_retry_at = None;
                operation.token.cancel();
                info!("Operation '{}' cancelled", operation_id);
                true
            }
            None => false,
        }
    }

    pub fn context(&self, operation_id: &str) -> Option<RetryContext> {
        self.lock_operations()
            .get(operation_id)
            .map(|operation| operation.context.clone())
    }

    /// Ids of every operation currently running.
    pub fn active_operations(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock_operations().keys().cloned().collect();
        ids.sort();
        ids
    }
}
