//! Scripted providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use market_feed::provider::{ClientError, ProviderClient, ProviderSeries};
use market_feed::{ManualClock, PricePoint, QuoteRequest};

/// What a scripted provider does on one call.
#[derive(Clone, Debug)]
pub enum Step {
    /// Return the provider's bars.
    Serve,
    /// Fail with this HTTP status.
    Status(u16),
    /// Yield to the scheduler once, then return the provider's bars.
    Deferred,
    /// Never answer.
    Hang,
}

/// A provider that plays back a script, then repeats a default step.
pub struct ScriptedProvider {
    id: &'static str,
    bars: Vec<PricePoint>,
    script: Mutex<VecDeque<Step>>,
    default_step: Step,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn serving(id: &'static str) -> Arc<Self> {
        Self::build(id, Step::Serve, week_of_bars(&[]))
    }

    pub fn failing(id: &'static str, status: u16) -> Arc<Self> {
        Self::build(id, Step::Status(status), week_of_bars(&[]))
    }

    pub fn hanging(id: &'static str) -> Arc<Self> {
        Self::build(id, Step::Hang, week_of_bars(&[]))
    }

    /// Serves bars whose closes are overridden on the given March 2024 days.
    pub fn serving_with_closes(id: &'static str, closes: &[(u32, Decimal)]) -> Arc<Self> {
        Self::build(id, Step::Serve, week_of_bars(closes))
    }

    /// Plays `steps` first, then `then` forever.
    pub fn scripted(id: &'static str, steps: Vec<Step>, then: Step) -> Arc<Self> {
        let provider = Self::build(id, then, week_of_bars(&[]));
        *provider.script.lock().unwrap() = steps.into();
        provider
    }

    fn build(id: &'static str, default_step: Step, bars: Vec<PricePoint>) -> Arc<Self> {
        Arc::new(Self {
            id,
            bars,
            script: Mutex::new(VecDeque::new()),
            default_step,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn series(&self) -> ProviderSeries {
        let mut series = ProviderSeries::new(self.bars.clone());
        series.time_zone = Some("US/Eastern".to_string());
        series
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
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_step.clone());

        match step {
            Step::Serve => Ok(self.series()),
            Step::Deferred => {
                tokio::task::yield_now().await;
                Ok(self.series())
            }
            Step::Status(status) => Err(ClientError::Http {
                status,
                body: format!("scripted {}", status),
                retry_after_seconds: None,
            }),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn march(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
}

/// Monday 4 to Friday 8 March 2024, oldest first, closes 100..=104 unless
/// overridden.
pub fn week_of_bars(closes: &[(u32, Decimal)]) -> Vec<PricePoint> {
    (4..=8)
        .map(|day| {
            let close = closes
                .iter()
                .find(|(d, _)| *d == day)
                .map(|(_, close)| *close)
                .unwrap_or_else(|| Decimal::from(96 + day));
            let high = close.max(Decimal::from(96 + day)) + dec!(1);
            let low = close.min(Decimal::from(96 + day)) - dec!(1);
            PricePoint::ohlcv(march(day), Decimal::from(96 + day), high, low, close, dec!(1000))
        })
        .collect()
}

/// Friday evening after the fixture week.
pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 8, 22, 0, 0).unwrap(),
    ))
}
