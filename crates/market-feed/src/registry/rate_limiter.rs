//! Sliding-window rate limiter for market data providers.
//!
//! Each provider gets a trailing 60-second window of request timestamps plus
//! a daily counter that resets at UTC midnight. The window is pruned on every
//! check instead of using fixed buckets, so a burst straddling a minute
//! boundary still counts against a single window.
//!
//! A request is recorded in the same critical section that admits it, so two
//! callers interleaving back to back cannot both pass on the last free slot.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveTime, Utc};
use log::{debug, warn};

use crate::clock::{seconds_until, Clock};
use crate::errors::MarketDataError;
use crate::models::ProviderId;
use crate::provider::RateLimit;

/// Length of the sliding window.
const WINDOW_SECONDS: i64 = 60;

/// Why a request was denied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LimitCause {
    /// `requests_per_minute` reached; a slot frees up shortly.
    MinuteWindow,
    /// `requests_per_day` reached; nothing frees up until the daily reset.
    DailyCap,
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_seconds: Option<u64>,
    pub cause: Option<LimitCause>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
            cause: None,
        }
    }

    fn denied(cause: LimitCause, retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds: Some(retry_after_seconds),
            cause: Some(cause),
        }
    }

    /// Convert a denial into a `RATE_LIMITED` error.
    pub fn into_result(self, provider: &ProviderId) -> Result<(), MarketDataError> {
        if self.allowed {
            return Ok(());
        }
        Err(MarketDataError::RateLimited {
            provider: provider.to_string(),
            retry_after_seconds: self.retry_after_seconds,
            daily_limit: self.cause == Some(LimitCause::DailyCap),
        })
    }
}

/// Current consumption for a provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateUsage {
    pub in_window: usize,
    pub daily_count: u32,
    pub daily_reset_at: Option<DateTime<Utc>>,
}

/// Request history for a single provider.
#[derive(Debug)]
struct RateWindow {
    /// Admission times within the trailing window, oldest first.
    timestamps: VecDeque<DateTime<Utc>>,
    daily_count: u32,
    daily_reset_at: DateTime<Utc>,
}

impl RateWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamps: VecDeque::new(),
            daily_count: 0,
            daily_reset_at: next_midnight(now),
        }
    }

    /// Drop entries that left the window and roll the daily counter.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(WINDOW_SECONDS);
        while matches!(self.timestamps.front(), Some(ts) if *ts <= cutoff) {
            self.timestamps.pop_front();
        }

        if now >= self.daily_reset_at {
            self.daily_count = 0;
            self.daily_reset_at = next_midnight(now);
        }
    }

    fn try_acquire(&mut self, now: DateTime<Utc>, limit: &RateLimit) -> RateDecision {
        self.prune(now);

        if self.daily_count >= limit.requests_per_day {
            return RateDecision::denied(
                LimitCause::DailyCap,
                seconds_until(now, self.daily_reset_at),
            );
        }

        if self.timestamps.len() >= limit.requests_per_minute as usize {
            let retry_after = self
                .timestamps
                .front()
                .map(|oldest| {
                    seconds_until(now, *oldest + ChronoDuration::seconds(WINDOW_SECONDS))
                })
                .unwrap_or(1);
            return RateDecision::denied(LimitCause::MinuteWindow, retry_after);
        }

        self.timestamps.push_back(now);
        self.daily_count += 1;
        RateDecision::allowed()
    }
}

fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .checked_add_days(Days::new(1))
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(now)
}

/// Sliding-window rate limiter for multiple providers.
///
/// Windows are created on demand. Providers without an explicit
/// configuration use [`RateLimit::default`].
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    /// Per-provider request windows.
    windows: Mutex<HashMap<String, RateWindow>>,
    /// Per-provider configuration overrides.
    configs: Mutex<HashMap<String, RateLimit>>,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the windows mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly off count, which is
    /// better than panicking.
    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        self.windows.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter windows mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock the configs mutex, recovering from poison if necessary.
    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimit>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure limits for a specific provider.
    pub fn configure(&self, provider: &ProviderId, limit: RateLimit) {
        self.lock_configs().insert(provider.to_string(), limit);
    }

    fn limit_for(&self, provider: &ProviderId) -> RateLimit {
        self.lock_configs()
            .get(provider.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Try to admit one request for the given provider without waiting.
    ///
    /// On success the request is recorded immediately.
    pub fn try_acquire(&self, provider: &ProviderId) -> RateDecision {
        let limit = self.limit_for(provider);
        let now = self.clock.now();

        let mut windows = self.lock_windows();
        let window = windows
            .entry(provider.to_string())
            .or_insert_with(|| RateWindow::new(now));

        let decision = window.try_acquire(now, &limit);
        match decision.cause {
            None => debug!(
                "Rate limiter: admitted request for '{}' ({}/{} this minute)",
                provider,
                window.timestamps.len(),
                limit.requests_per_minute
            ),
            Some(cause) => debug!(
                "Rate limiter: denied '{}' ({:?}), retry in {:?}s",
                provider, cause, decision.retry_after_seconds
            ),
        }
        decision
    }

    /// Current consumption for a provider.
    pub fn usage(&self, provider: &ProviderId) -> RateUsage {
        let now = self.clock.now();
        let mut windows = self.lock_windows();

        match windows.get_mut(provider.as_ref()) {
            Some(window) => {
                window.prune(now);
                RateUsage {
                    in_window: window.timestamps.len(),
                    daily_count: window.daily_count,
                    daily_reset_at: Some(window.daily_reset_at),
                }
            }
            None => RateUsage {
                in_window: 0,
                daily_count: 0,
                daily_reset_at: None,
            },
        }
    }

    /// Forget all recorded requests for a provider.
    pub fn reset(&self, provider: &ProviderId) {
        self.lock_windows().remove(provider.as_ref());
    }
}
