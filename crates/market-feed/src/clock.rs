//! Time source for every timer-driven decision in the crate.
//!
//! Rate-window pruning, circuit recovery, health cool-downs, per-call timeouts
//! and retry backoff all read time and wait through a [`Clock`]. Production
//! code uses [`SystemClock`]; tests inject a [`ManualClock`] and move virtual
//! time forward explicitly.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Injectable clock and timer capability.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Converts a std duration into a chrono delta, saturating on overflow.
pub(crate) fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Whole seconds until `target`, rounded up, never below one.
pub(crate) fn seconds_until(now: DateTime<Utc>, target: DateTime<Utc>) -> u64 {
    let millis = (target - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

/// Real time backed by `chrono::Utc` and `tokio::time`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` yields once to the scheduler so other tasks can interleave, then
/// records the duration and advances the virtual time by it. A sleep dropped
/// before it completes (a timeout that lost its race) leaves time untouched.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    fn lock_now(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_sleeps(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move virtual time forward.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.lock_now();
        *now += to_delta(duration);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.lock_now() = instant;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock_sleeps().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock_now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::task::yield_now().await;
        self.lock_sleeps().push(duration);
        self.advance(duration);
    }
}
