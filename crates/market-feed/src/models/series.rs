use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::request::Timeframe;
use super::types::ProviderId;

/// Where a point came from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    /// Reported by an upstream provider.
    #[default]
    Provider,
    /// Estimated from neighbouring points; never compared against providers.
    Interpolated,
}

/// One OHLCV bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    /// Bar open time (midnight UTC for daily and longer bars).
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_close: Option<Decimal>,
    #[serde(default)]
    pub origin: DataOrigin,
}

impl PricePoint {
    /// Create a provider-sourced OHLCV bar.
    pub fn ohlcv(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: None,
            origin: DataOrigin::Provider,
        }
    }

    /// Calendar date of the bar.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn is_interpolated(&self) -> bool {
        self.origin == DataOrigin::Interpolated
    }
}

/// Provenance of a served series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesMetadata {
    pub last_refreshed: DateTime<Utc>,
    pub time_zone: String,
    /// Human-readable name of the provider.
    pub data_source: String,
    pub request_time: DateTime<Utc>,
    pub provider: ProviderId,
    /// True when the serving provider was not the first candidate.
    pub fallback_used: bool,
}

/// A symbol's bars, newest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub data: Vec<PricePoint>,
    pub metadata: SeriesMetadata,
}

impl TimeSeries {
    /// Order bars newest first and drop duplicate timestamps, keeping the
    /// first occurrence.
    pub fn sort_newest_first(&mut self) {
        self.data.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.data.dedup_by(|a, b| a.timestamp == b.timestamp);
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.data.first()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
