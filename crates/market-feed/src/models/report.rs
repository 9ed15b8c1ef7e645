use std::borrow::Cow;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::series::PricePoint;
use super::types::ProviderId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    Price,
    Volume,
    MissingData,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancySeverity {
    Low,
    Medium,
    High,
}

/// A disagreement between two providers about one bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub kind: DiscrepancyKind,
    pub severity: DiscrepancySeverity,
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_a: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_b: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_delta: Option<f64>,
}

/// Component scores, each in `0..=100`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f64,
    pub consistency: f64,
    pub completeness: f64,
    pub freshness: f64,
    pub reliability: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Which input the reconciler trusts more.
///
/// Serialized as the provider id or `"merged"`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecommendedSource {
    Provider(ProviderId),
    Merged,
}

impl From<String> for RecommendedSource {
    fn from(value: String) -> Self {
        if value == "merged" {
            Self::Merged
        } else {
            Self::Provider(Cow::Owned(value))
        }
    }
}

impl From<RecommendedSource> for String {
    fn from(value: RecommendedSource) -> Self {
        match value {
            RecommendedSource::Provider(id) => id.into_owned(),
            RecommendedSource::Merged => "merged".to_string(),
        }
    }
}

/// Result of cross-checking two providers' series for one symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub symbol: String,
    /// Span of the union of both series; `None` when both are empty.
    pub date_range: Option<DateRange>,
    pub quality_score: QualityScore,
    pub discrepancies: Vec<Discrepancy>,
    pub interpolated_point_count: usize,
    pub recommended_source: RecommendedSource,
    /// `0..=1`.
    pub confidence: f64,
    /// Reconciled series, newest first; filled gaps are tagged `Interpolated`.
    pub merged: Vec<PricePoint>,
}

impl ConsistencyReport {
    /// Discrepancies of the given kind.
    pub fn discrepancies_of(&self, kind: DiscrepancyKind) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter().filter(move |d| d.kind == kind)
    }
}
