use chrono::NaiveDate;

use crate::models::{Discrepancy, DiscrepancySeverity, QualityScore};

use super::interpolate::business_days_elapsed;

const CONSISTENCY_WEIGHT: f64 = 0.4;
const COMPLETENESS_WEIGHT: f64 = 0.3;
const FRESHNESS_WEIGHT: f64 = 0.2;
const RELIABILITY_WEIGHT: f64 = 0.1;

pub(super) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub(super) struct QualityInputs<'a> {
    pub discrepancies: &'a [Discrepancy],
    /// Populated dates of the better-covered series.
    pub populated: usize,
    pub union: usize,
    pub latest_common: Option<NaiveDate>,
    pub as_of: NaiveDate,
}

impl QualityInputs<'_> {
    fn consistency(&self) -> f64 {
        let penalty: f64 = self
            .discrepancies
            .iter()
            .map(|d| match d.severity {
                DiscrepancySeverity::High => 10.0,
                DiscrepancySeverity::Medium => 5.0,
                DiscrepancySeverity::Low => 0.0,
            })
            .sum();
        (100.0 - penalty).max(0.0)
    }

    fn completeness(&self) -> f64 {
        self.populated as f64 / self.union as f64 * 100.0
    }

    /// One business day of lag is normal; each further day costs 10 points.
    fn freshness(&self) -> f64 {
        match self.latest_common {
            Some(latest) => {
                let stale = business_days_elapsed(latest, self.as_of).saturating_sub(1);
                (100.0 - 10.0 * stale as f64).max(0.0)
            }
            None => 0.0,
        }
    }

    pub fn score(&self) -> QualityScore {
        if self.union == 0 {
            return QualityScore {
                overall: 0.0,
                consistency: 0.0,
                completeness: 0.0,
                freshness: 0.0,
                reliability: 0.0,
            };
        }

        let consistency = self.consistency();
        let completeness = self.completeness();
        let freshness = self.freshness();
        let reliability = if consistency >= 90.0 {
            100.0
        } else {
            consistency
        };
        let overall = CONSISTENCY_WEIGHT * consistency
            + COMPLETENESS_WEIGHT * completeness
            + FRESHNESS_WEIGHT * freshness
            + RELIABILITY_WEIGHT * reliability;

        QualityScore {
            overall: round_to(overall, 2),
            consistency: round_to(consistency, 2),
            completeness: round_to(completeness, 2),
            freshness: round_to(freshness, 2),
            reliability: round_to(reliability, 2),
        }
    }
}
