//! Business-day calendar helpers and linear gap filling.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use rust_decimal::Decimal;

use crate::models::{DataOrigin, PricePoint};

pub(crate) fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Weekdays strictly between `start` and `end`.
pub(crate) fn business_days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while let Some(next) = current.checked_add_days(Days::new(1)) {
        if next >= end {
            break;
        }
        if is_business_day(next) {
            days.push(next);
        }
        current = next;
    }
    days
}

/// Weekdays after `start`, up to and including `end`.
pub(crate) fn business_days_elapsed(start: NaiveDate, end: NaiveDate) -> usize {
    if end <= start {
        return 0;
    }
    let inclusive_end = usize::from(is_business_day(end));
    business_days_between(start, end).len() + inclusive_end
}

/// Value `step` of `steps` along the line from `from` to `to`.
fn lerp(from: Decimal, to: Decimal, step: Decimal, steps: Decimal) -> Decimal {
    from + (to - from) * step / steps
}

/// Fill business-day gaps of at most `max_gap` missing days by linear
/// interpolation of every OHLCV field.
///
/// Returns the points oldest first together with the number of points
/// added. Filled points are tagged [`DataOrigin::Interpolated`]; longer gaps
/// are left alone.
pub fn interpolate_gaps(points: &[PricePoint], max_gap: usize) -> (Vec<PricePoint>, usize) {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.timestamp);
    sorted.dedup_by_key(|p| p.timestamp);

    let mut filled = Vec::with_capacity(sorted.len());
    let mut added = 0;

    for pair in sorted.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        filled.push(before.clone());

        let missing = business_days_between(before.date(), after.date());
        if missing.is_empty() || missing.len() > max_gap {
            continue;
        }

        let steps = Decimal::from(missing.len() as u64 + 1);
        for (index, date) in missing.into_iter().enumerate() {
            let step = Decimal::from(index as u64 + 1);
            let timestamp = date.and_time(before.timestamp.time()).and_utc();
            filled.push(PricePoint {
                timestamp,
                open: lerp(before.open, after.open, step, steps),
                high: lerp(before.high, after.high, step, steps),
                low: lerp(before.low, after.low, step, steps),
                close: lerp(before.close, after.close, step, steps),
                volume: lerp(before.volume, after.volume, step, steps).round(),
                adjusted_close: match (before.adjusted_close, after.adjusted_close) {
                    (Some(from), Some(to)) => Some(lerp(from, to, step, steps)),
                    _ => None,
                },
                origin: DataOrigin::Interpolated,
            });
            added += 1;
        }
    }

    if let Some(last) = sorted.last() {
        filled.push(last.clone());
    }

    (filled, added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn close_on(year: i32, month: u32, day: u32, close: Decimal) -> PricePoint {
        PricePoint::ohlcv(
            Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
            close,
            close,
            close,
            close,
            dec!(1000),
        )
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_single_missing_day_is_midpoint() {
        // Mon 4th and Wed 6th March 2024.
        let points = vec![
            close_on(2024, 3, 6, dec!(110)),
            close_on(2024, 3, 4, dec!(100)),
        ];

        let (filled, added) = interpolate_gaps(&points, 3);

        assert_eq!(added, 1);
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[1].date(), date(5));
        assert_eq!(filled[1].close, dec!(105));
        assert!(filled[1].is_interpolated());
        assert!(!filled[0].is_interpolated());
    }

    #[test]
    fn test_weekend_is_not_a_gap() {
        // Fri 8th and Mon 11th.
        let points = vec![
            close_on(2024, 3, 8, dec!(100)),
            close_on(2024, 3, 11, dec!(104)),
        ];

        let (filled, added) = interpolate_gaps(&points, 3);
        assert_eq!(added, 0);
        assert_eq!(filled.len(), 2);
    }

    #[test]
    fn test_gap_spanning_weekend_uses_business_days() {
        // Thu 7th to Tue 12th: Fri 8th and Mon 11th are missing.
        let points = vec![
            close_on(2024, 3, 7, dec!(100)),
            close_on(2024, 3, 12, dec!(130)),
        ];

        let (filled, added) = interpolate_gaps(&points, 3);
        assert_eq!(added, 2);
        assert_eq!(filled[1].date(), date(8));
        assert_eq!(filled[1].close, dec!(110));
        assert_eq!(filled[2].date(), date(11));
        assert_eq!(filled[2].close, dec!(120));
    }

    #[test]
    fn test_long_gap_left_unfilled() {
        // Mon 4th to Mon 11th: four business days missing.
        let points = vec![
            close_on(2024, 3, 4, dec!(100)),
            close_on(2024, 3, 11, dec!(120)),
        ];

        let (filled, added) = interpolate_gaps(&points, 3);
        assert_eq!(added, 0);
        assert_eq!(filled.len(), 2);
    }

    #[test]
    fn test_business_days_elapsed() {
        // Fri 8th -> Mon 11th is one business day.
        assert_eq!(business_days_elapsed(date(8), date(11)), 1);
        assert_eq!(business_days_elapsed(date(4), date(7)), 3);
        assert_eq!(business_days_elapsed(date(8), date(9)), 0);
        assert_eq!(business_days_elapsed(date(8), date(8)), 0);
    }
}
