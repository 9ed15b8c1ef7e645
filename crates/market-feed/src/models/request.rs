use std::borrow::Cow;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::ProviderId;
use crate::errors::MarketDataError;

lazy_static! {
    /// Exchange tickers, index symbols (`^GSPC`), share classes (`BRK.B`, `BF-B`)
    /// and FX pairs (`EURUSD=X`).
    static ref TICKER_PATTERN: Regex = Regex::new(r"^[A-Z0-9^][A-Z0-9.\-=^]{0,14}$")
        .expect("ticker pattern is a valid regex");
}

/// Bar size of the requested series.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "DAILY")]
    Daily,
    #[serde(rename = "WEEKLY")]
    Weekly,
    #[serde(rename = "MONTHLY")]
    Monthly,
    #[serde(rename = "INTRADAY_1MIN")]
    Intraday1Min,
    #[serde(rename = "INTRADAY_5MIN")]
    Intraday5Min,
    #[serde(rename = "INTRADAY_15MIN")]
    Intraday15Min,
}

impl Timeframe {
    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Self::Intraday1Min | Self::Intraday5Min | Self::Intraday15Min
        )
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Intraday1Min => "INTRADAY_1MIN",
            Self::Intraday5Min => "INTRADAY_5MIN",
            Self::Intraday15Min => "INTRADAY_15MIN",
        };
        f.write_str(name)
    }
}

/// Which provider the caller wants to be served by.
///
/// Serialized as a plain string: `"auto"` or the provider id.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderPreference {
    /// Let the orchestrator rank providers by health.
    Auto,
    /// Try this provider first whenever it is available.
    Provider(ProviderId),
}

impl ProviderPreference {
    pub fn provider(id: impl Into<String>) -> Self {
        Self::Provider(Cow::Owned(id.into()))
    }

    /// The preferred provider id, `None` for `Auto`.
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Provider(id) => Some(id.as_ref()),
        }
    }
}

impl From<String> for ProviderPreference {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("auto") || value.is_empty() {
            Self::Auto
        } else {
            Self::Provider(Cow::Owned(value))
        }
    }
}

impl From<ProviderPreference> for String {
    fn from(value: ProviderPreference) -> Self {
        match value {
            ProviderPreference::Auto => "auto".to_string(),
            ProviderPreference::Provider(id) => id.into_owned(),
        }
    }
}

/// A request for one symbol's time series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Per-call timeout; applies to each provider call, not the whole sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<ProviderPreference>,
    /// Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_fallback: Option<bool>,
}

impl QuoteRequest {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            start_date: None,
            end_date: None,
            timeout_ms: None,
            preferred_provider: None,
            enable_fallback: None,
        }
    }

    pub fn with_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_preference(mut self, preference: ProviderPreference) -> Self {
        self.preferred_provider = Some(preference);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.enable_fallback = Some(false);
        self
    }

    pub fn fallback_enabled(&self) -> bool {
        self.enable_fallback.unwrap_or(true)
    }

    /// Trimmed, upper-cased symbol.
    pub fn normalized_symbol(&self) -> String {
        self.symbol.trim().to_ascii_uppercase()
    }

    /// Check the request before any provider is contacted.
    ///
    /// Returns the normalized symbol.
    pub fn validate(&self) -> Result<String, MarketDataError> {
        let symbol = self.normalized_symbol();
        if symbol.is_empty() {
            return Err(MarketDataError::invalid_request("Symbol is required"));
        }
        if !TICKER_PATTERN.is_match(&symbol) {
            return Err(MarketDataError::invalid_request(format!(
                "'{}' is not a valid ticker symbol",
                self.symbol
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(MarketDataError::invalid_request(format!(
                    "Start date {} is after end date {}",
                    start, end
                )));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(MarketDataError::invalid_request(
                "Timeout must be greater than zero",
            ));
        }
        Ok(symbol)
    }
}
