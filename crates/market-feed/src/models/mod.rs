//! Market feed models
//!
//! This module contains the core data types exchanged with callers:
//! - `types` - Type aliases for common identifiers (ProviderId)
//! - `request` - What the caller asks for (QuoteRequest, Timeframe, ProviderPreference)
//! - `series` - What providers return (PricePoint, TimeSeries, SeriesMetadata)
//! - `report` - Reconciliation output (Discrepancy, QualityScore, ConsistencyReport)

mod report;
mod request;
mod series;
mod types;

pub use report::{
    ConsistencyReport, DateRange, Discrepancy, DiscrepancyKind, DiscrepancySeverity,
    QualityScore, RecommendedSource,
};
pub use request::{ProviderPreference, QuoteRequest, Timeframe};
pub use series::{DataOrigin, PricePoint, SeriesMetadata, TimeSeries};
pub use types::ProviderId;
