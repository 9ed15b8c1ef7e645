//! Cross-checking two providers' series for the same symbol.
//!
//! [`ConsistencyReconciler::reconcile`] aligns two series by date (by exact
//! timestamp for intraday bars),
//! flags price, volume and coverage disagreements, scores overall data
//! quality, recommends which input to trust, and produces a merged series
//! with short daily gaps filled by interpolation.
//!
//! Reconciliation is a pure function of its inputs: the "as of" time used for
//! freshness is the later of the two series' request times, never the wall
//! clock.

mod interpolate;
mod scoring;

pub use interpolate::interpolate_gaps;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use log::debug;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{
    ConsistencyReport, DateRange, Discrepancy, DiscrepancyKind, DiscrepancySeverity, PricePoint,
    RecommendedSource, Timeframe, TimeSeries,
};
use crate::registry::QuoteValidator;

use scoring::{round_to, QualityInputs};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Close-price disagreement (percent) above which a date is flagged.
    pub price_threshold_pct: f64,
    /// Close-price disagreement (percent) above which the flag is High.
    pub price_high_pct: f64,
    pub volume_threshold_pct: f64,
    pub volume_high_pct: f64,
    /// Longest run of missing business days that gets interpolated.
    pub max_interpolation_gap: usize,
    /// How much larger (as a fraction) one series must be to win on coverage.
    pub coverage_margin: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            price_threshold_pct: 5.0,
            price_high_pct: 10.0,
            volume_threshold_pct: 20.0,
            volume_high_pct: 50.0,
            max_interpolation_gap: 3,
            coverage_margin: 0.2,
        }
    }
}

/// `|a - b| / avg(a, b) * 100`; `None` when the average is zero.
fn percent_delta(a: Decimal, b: Decimal) -> Option<f64> {
    let average = (a + b) / Decimal::from(2);
    if average.is_zero() {
        return None;
    }
    ((a - b).abs() / average * Decimal::ONE_HUNDRED).to_f64()
}

/// Key a bar for alignment. Daily and longer bars match on their trading
/// date whatever time of day the provider stamped them with.
fn alignment_key(timeframe: Timeframe, point: &PricePoint) -> DateTime<Utc> {
    if timeframe.is_intraday() {
        point.timestamp
    } else {
        point.date().and_time(NaiveTime::MIN).and_utc()
    }
}

/// Index a series by alignment key, skipping points that were themselves
/// interpolated upstream.
fn index_observed(series: &TimeSeries) -> BTreeMap<DateTime<Utc>, &PricePoint> {
    let mut indexed = BTreeMap::new();
    for point in series.data.iter().filter(|p| !p.is_interpolated()) {
        indexed
            .entry(alignment_key(series.timeframe, point))
            .or_insert(point);
    }
    indexed
}

#[derive(Clone, Debug, Default)]
pub struct ConsistencyReconciler {
    config: ReconcilerConfig,
    validator: QuoteValidator,
}

impl ConsistencyReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        Self {
            config,
            validator: QuoteValidator::new(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn compare_close(
        &self,
        timestamp: DateTime<Utc>,
        a: &PricePoint,
        b: &PricePoint,
    ) -> Option<Discrepancy> {
        let delta = percent_delta(a.close, b.close)?;
        if delta <= self.config.price_threshold_pct {
            return None;
        }
        let severity = if delta > self.config.price_high_pct {
            DiscrepancySeverity::High
        } else {
            DiscrepancySeverity::Medium
        };
        Some(Discrepancy {
            kind: DiscrepancyKind::Price,
            severity,
            timestamp,
            value_a: Some(a.close),
            value_b: Some(b.close),
            percent_delta: Some(round_to(delta, 2)),
        })
    }

    fn compare_volume(
        &self,
        timestamp: DateTime<Utc>,
        a: &PricePoint,
        b: &PricePoint,
    ) -> Option<Discrepancy> {
        let delta = percent_delta(a.volume, b.volume)?;
        if delta <= self.config.volume_threshold_pct {
            return None;
        }
        let severity = if delta > self.config.volume_high_pct {
            DiscrepancySeverity::High
        } else {
            DiscrepancySeverity::Low
        };
        Some(Discrepancy {
            kind: DiscrepancyKind::Volume,
            severity,
            timestamp,
            value_a: Some(a.volume),
            value_b: Some(b.volume),
            percent_delta: Some(round_to(delta, 2)),
        })
    }

    fn missing(
        timestamp: DateTime<Utc>,
        a: Option<&PricePoint>,
        b: Option<&PricePoint>,
    ) -> Discrepancy {
        Discrepancy {
            kind: DiscrepancyKind::MissingData,
            severity: DiscrepancySeverity::Medium,
            timestamp,
            value_a: a.map(|p| p.close),
            value_b: b.map(|p| p.close),
            percent_delta: None,
        }
    }

    /// Pick the series to trust: clearly better coverage first, then fewer
    /// attributable issues, otherwise neither.
    fn recommend(
        &self,
        a: &TimeSeries,
        b: &TimeSeries,
        count_a: usize,
        count_b: usize,
        issues_a: usize,
        issues_b: usize,
    ) -> RecommendedSource {
        let margin = 1.0 + self.config.coverage_margin;
        if count_a as f64 > count_b as f64 * margin {
            return RecommendedSource::Provider(a.metadata.provider.clone());
        }
        if count_b as f64 > count_a as f64 * margin {
            return RecommendedSource::Provider(b.metadata.provider.clone());
        }
        match issues_a.cmp(&issues_b) {
            std::cmp::Ordering::Less => RecommendedSource::Provider(a.metadata.provider.clone()),
            std::cmp::Ordering::Greater => {
                RecommendedSource::Provider(b.metadata.provider.clone())
            }
            std::cmp::Ordering::Equal => RecommendedSource::Merged,
        }
    }

    /// Cross-check two series for `symbol`.
    pub fn reconcile(&self, a: &TimeSeries, b: &TimeSeries, symbol: &str) -> ConsistencyReport {
        let observed_a = index_observed(a);
        let observed_b = index_observed(b);

        let mut union: Vec<DateTime<Utc>> = observed_a
            .keys()
            .chain(observed_b.keys())
            .copied()
            .collect();
        union.sort();
        union.dedup();

        let mut discrepancies = Vec::new();
        let mut common = Vec::new();
        let (mut missing_in_a, mut missing_in_b) = (0usize, 0usize);

        for &timestamp in &union {
            match (observed_a.get(&timestamp), observed_b.get(&timestamp)) {
                (Some(pa), Some(pb)) => {
                    common.push(timestamp);
                    discrepancies.extend(self.compare_close(timestamp, pa, pb));
                    discrepancies.extend(self.compare_volume(timestamp, pa, pb));
                }
                (Some(pa), None) => {
                    missing_in_b += 1;
                    discrepancies.push(Self::missing(timestamp, Some(*pa), None));
                }
                (None, Some(pb)) => {
                    missing_in_a += 1;
                    discrepancies.push(Self::missing(timestamp, None, Some(*pb)));
                }
                (None, None) => {}
            }
        }

        let invalid_a = observed_a
            .values()
            .filter(|p| !self.validator.is_valid(p))
            .count();
        let invalid_b = observed_b
            .values()
            .filter(|p| !self.validator.is_valid(p))
            .count();

        let as_of = a.metadata.request_time.max(b.metadata.request_time);
        let quality_score = QualityInputs {
            discrepancies: &discrepancies,
            populated: observed_a.len().max(observed_b.len()),
            union: union.len(),
            latest_common: common.last().map(|ts| ts.date_naive()),
            as_of: as_of.date_naive(),
        }
        .score();

        let recommended_source = self.recommend(
            a,
            b,
            observed_a.len(),
            observed_b.len(),
            missing_in_a + invalid_a,
            missing_in_b + invalid_b,
        );

        let prefer_b = matches!(
            &recommended_source,
            RecommendedSource::Provider(id) if *id == b.metadata.provider && *id != a.metadata.provider
        );
        let merged_oldest_first: Vec<PricePoint> = union
            .iter()
            .filter_map(|timestamp| {
                let (pa, pb) = (observed_a.get(timestamp), observed_b.get(timestamp));
                let chosen = if prefer_b { pb.or(pa) } else { pa.or(pb) };
                chosen.map(|p| (*p).clone())
            })
            .collect();

        let daily = a.timeframe == Timeframe::Daily && b.timeframe == Timeframe::Daily;
        let (mut merged, interpolated_point_count) = if daily {
            interpolate_gaps(&merged_oldest_first, self.config.max_interpolation_gap)
        } else {
            (merged_oldest_first, 0)
        };
        merged.reverse();

        let confidence = if union.is_empty() {
            0.0
        } else {
            round_to(
                quality_score.overall / 100.0 * common.len() as f64 / union.len() as f64,
                4,
            )
        };

        let date_range = match (union.first(), union.last()) {
            (Some(start), Some(end)) => Some(DateRange {
                start: *start,
                end: *end,
            }),
            _ => None,
        };

        debug!(
            "Reconciled {} for {} vs {}: {} discrepancies, quality {}, confidence {}",
            symbol,
            a.metadata.provider,
            b.metadata.provider,
            discrepancies.len(),
            quality_score.overall,
            confidence
        );

        ConsistencyReport {
            symbol: symbol.to_string(),
            date_range,
            quality_score,
            discrepancies,
            interpolated_point_count,
            recommended_source,
            confidence,
            merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeriesMetadata;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::borrow::Cow;

    fn bar(day: u32, close: Decimal, volume: Decimal) -> PricePoint {
        PricePoint::ohlcv(
            Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            close,
            close,
            close,
            close,
            volume,
        )
    }

    fn series(provider: &'static str, mut data: Vec<PricePoint>) -> TimeSeries {
        data.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        // Fri 8th March 2024, after the close.
        let request_time = Utc.with_ymd_and_hms(2024, 3, 8, 22, 0, 0).unwrap();
        TimeSeries {
            symbol: "AAPL".to_string(),
            timeframe: Timeframe::Daily,
            data,
            metadata: SeriesMetadata {
                last_refreshed: request_time,
                time_zone: "US/Eastern".to_string(),
                data_source: provider.to_string(),
                request_time,
                provider: Cow::Borrowed(provider),
                fallback_used: false,
            },
        }
    }

    /// Mon 4th .. Fri 8th March 2024.
    fn week(closes: [Decimal; 5]) -> Vec<PricePoint> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| bar(4 + i as u32, *close, dec!(1000)))
            .collect()
    }

    #[test]
    fn test_identical_series_score_perfectly() {
        let a = series("ALPHA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        let b = series("BETA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        assert!(report.discrepancies.is_empty());
        assert_eq!(report.quality_score.overall, 100.0);
        assert_eq!(report.confidence, 1.0);
        assert_eq!(report.recommended_source, RecommendedSource::Merged);
        assert_eq!(report.merged.len(), 5);
        assert!(report.merged[0].timestamp > report.merged[4].timestamp);
    }

    #[test]
    fn test_six_percent_close_gap_is_one_medium_discrepancy() {
        let a = series("ALPHA", week([dec!(100), dec!(100), dec!(100), dec!(100), dec!(100)]));
        let b = series("BETA", week([dec!(100), dec!(100), dec!(106), dec!(100), dec!(100)]));

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        assert_eq!(report.discrepancies.len(), 1);
        let discrepancy = &report.discrepancies[0];
        assert_eq!(discrepancy.kind, DiscrepancyKind::Price);
        assert_eq!(discrepancy.severity, DiscrepancySeverity::Medium);
        assert_eq!(discrepancy.percent_delta, Some(5.83));
        assert_eq!(report.quality_score.consistency, 95.0);
        assert!(report.quality_score.consistency < 100.0);
    }

    #[test]
    fn test_large_gaps_are_high_severity() {
        let mut b_week = week([dec!(100), dec!(100), dec!(120), dec!(100), dec!(100)]);
        b_week[0].volume = dec!(3000);
        let a = series("ALPHA", week([dec!(100), dec!(100), dec!(100), dec!(100), dec!(100)]));
        let b = series("BETA", b_week);

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        let price: Vec<_> = report.discrepancies_of(DiscrepancyKind::Price).collect();
        let volume: Vec<_> = report.discrepancies_of(DiscrepancyKind::Volume).collect();
        assert_eq!(price.len(), 1);
        assert_eq!(price[0].severity, DiscrepancySeverity::High);
        assert_eq!(volume.len(), 1);
        assert_eq!(volume[0].severity, DiscrepancySeverity::High);
        assert_eq!(report.quality_score.consistency, 80.0);
        // Consistency below 90 caps reliability.
        assert_eq!(report.quality_score.reliability, 80.0);
    }

    #[test]
    fn test_missing_date_is_flagged_and_interpolated() {
        let a = series(
            "ALPHA",
            vec![
                bar(4, dec!(100), dec!(1000)),
                bar(6, dec!(110), dec!(1000)),
                bar(7, dec!(111), dec!(1000)),
                bar(8, dec!(112), dec!(1000)),
            ],
        );
        let b = series(
            "BETA",
            vec![
                bar(4, dec!(100), dec!(1000)),
                bar(6, dec!(110), dec!(1000)),
                bar(7, dec!(111), dec!(1000)),
                bar(8, dec!(112), dec!(1000)),
            ],
        );

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        assert!(report.discrepancies.is_empty());
        assert_eq!(report.interpolated_point_count, 1);
        let tuesday = report
            .merged
            .iter()
            .find(|p| p.date() == chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
            .unwrap();
        assert_eq!(tuesday.close, dec!(105));
        assert!(tuesday.is_interpolated());
    }

    #[test]
    fn test_daily_bars_align_on_date_not_time_of_day() {
        let a = series("ALPHA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        let mut b_week = week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);
        for point in &mut b_week {
            point.timestamp += chrono::Duration::hours(14);
        }
        let b = series("BETA", b_week);

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        assert!(report.discrepancies.is_empty());
        assert_eq!(report.quality_score.consistency, 100.0);
        assert_eq!(report.recommended_source, RecommendedSource::Merged);
        assert_eq!(report.merged.len(), 5);
        assert_eq!(report.confidence, 1.0);
    }

    #[test]
    fn test_intraday_bars_align_on_exact_timestamp() {
        let mut a = series("ALPHA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        let mut b_week = week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);
        b_week[0].timestamp += chrono::Duration::minutes(5);
        let mut b = series("BETA", b_week);
        a.timeframe = Timeframe::Intraday5Min;
        b.timeframe = Timeframe::Intraday5Min;

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        assert_eq!(report.discrepancies_of(DiscrepancyKind::MissingData).count(), 2);
    }

    #[test]
    fn test_one_sided_date_is_missing_data() {
        let a = series("ALPHA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        let mut b_week = week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);
        b_week.remove(2);
        let b = series("BETA", b_week);

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        let missing: Vec<_> = report.discrepancies_of(DiscrepancyKind::MissingData).collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].severity, DiscrepancySeverity::Medium);
        assert_eq!(missing[0].value_a, Some(dec!(102)));
        assert_eq!(missing[0].value_b, None);
        // Five dates against four is more than a 20% coverage advantage.
        assert_eq!(
            report.recommended_source,
            RecommendedSource::Provider(Cow::Borrowed("ALPHA"))
        );
        assert_eq!(report.quality_score.completeness, 100.0);
        assert_eq!(report.confidence, 0.784);
    }

    #[test]
    fn test_interpolated_inputs_count_as_absent() {
        let mut a_week = week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);
        a_week[2].origin = crate::models::DataOrigin::Interpolated;
        a_week[2].close = dec!(500);
        let a = series("ALPHA", a_week);
        let b = series("BETA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");

        assert!(report.discrepancies_of(DiscrepancyKind::Price).next().is_none());
        assert_eq!(report.discrepancies_of(DiscrepancyKind::MissingData).count(), 1);
    }

    #[test]
    fn test_clear_coverage_advantage_wins() {
        let a = series("ALPHA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        let b = series("BETA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)])[3..].to_vec());

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");
        assert_eq!(
            report.recommended_source,
            RecommendedSource::Provider(Cow::Borrowed("ALPHA"))
        );
    }

    #[test]
    fn test_stale_series_lose_freshness() {
        let mut a = series("ALPHA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        let b = series("BETA", week([dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]));
        // Thu 14th March: four business days after the last bar.
        a.metadata.request_time = Utc.with_ymd_and_hms(2024, 3, 14, 22, 0, 0).unwrap();

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");
        assert_eq!(report.quality_score.freshness, 70.0);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let a = series(
            "ALPHA",
            vec![bar(4, dec!(100), dec!(1000)), bar(6, dec!(110), dec!(900))],
        );
        let b = series(
            "BETA",
            vec![bar(4, dec!(103), dec!(1000)), bar(5, dec!(104), dec!(1000))],
        );

        let reconciler = ConsistencyReconciler::new();
        let first = reconciler.reconcile(&a, &b, "AAPL");
        let second = reconciler.reconcile(&a, &b, "AAPL");
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_inputs() {
        let a = series("ALPHA", vec![]);
        let b = series("BETA", vec![]);

        let report = ConsistencyReconciler::new().reconcile(&a, &b, "AAPL");
        assert!(report.date_range.is_none());
        assert!(report.merged.is_empty());
        assert_eq!(report.confidence, 0.0);
        assert_eq!(report.quality_score.overall, 0.0);
    }
}
