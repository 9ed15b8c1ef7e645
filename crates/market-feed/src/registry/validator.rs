//! Price point validation.
//!
//! Validates bars from providers to ensure data quality:
//! - OHLC invariants (high >= low, open/close between high/low)
//! - Non-negative values
//! - Reasonable value ranges

use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;
use crate::models::PricePoint;

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Hard failure - drop the bar.
    Hard,
    /// Soft warning - accept the bar but log a warning.
    Soft,
}

/// Validation result details.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: ValidationSeverity,
    /// Description of the issue.
    pub message: String,
}

/// Quote validator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorConfig {
    /// Whether to reject bars with negative prices.
    pub reject_negative_prices: bool,
    /// Whether to reject bars where high < low.
    pub reject_invalid_ohlc: bool,
    /// Maximum allowed price value (for sanity check).
    pub max_price: Option<Decimal>,
    /// Whether to warn on zero volume.
    pub warn_on_zero_volume: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reject_negative_prices: true,
            reject_invalid_ohlc: true,
            max_price: Some(Decimal::from(1_000_000_000i64)), // 1 billion as sanity check
            warn_on_zero_volume: false,
        }
    }
}

/// Bar validator.
///
/// Validates price points to ensure quality and consistency.
/// Configuration allows for different validation strictness levels.
#[derive(Clone, Debug, Default)]
pub struct QuoteValidator {
    config: ValidatorConfig,
}

impl QuoteValidator {
    /// Create a new validator with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom configuration.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a bar reported by `provider`.
    ///
    /// Returns Ok(()) if the bar is usable, or `ValidationFailed` listing
    /// every hard issue. Warnings are logged but do not cause rejection.
    pub fn validate(&self, provider: &str, point: &PricePoint) -> Result<(), MarketDataError> {
        let issues = self.issues(point);

        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message.as_str())
            .collect();

        if !errors.is_empty() {
            return Err(MarketDataError::ValidationFailed {
                provider: provider.to_string(),
                message: errors.join("; "),
            });
        }

        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Soft) {
            warn!(
                "Bar validation warning for {} at {}: {}",
                provider, point.timestamp, issue.message
            );
        }

        Ok(())
    }

    /// Whether a bar has no hard issues. Does not log.
    pub fn is_valid(&self, point: &PricePoint) -> bool {
        self.issues(point)
            .iter()
            .all(|i| i.severity != ValidationSeverity::Hard)
    }

    /// Validate all bars in a batch.
    ///
    /// Returns a tuple of (valid_points, invalid_points_with_errors).
    pub fn validate_batch(
        &self,
        provider: &str,
        points: Vec<PricePoint>,
    ) -> (Vec<PricePoint>, Vec<(PricePoint, MarketDataError)>) {
        let mut valid = Vec::with_capacity(points.len());
        let mut invalid = Vec::new();

        for point in points {
            match self.validate(provider, &point) {
                Ok(()) => valid.push(point),
                Err(e) => invalid.push((point, e)),
            }
        }

        (valid, invalid)
    }

    fn issues(&self, point: &PricePoint) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        self.validate_prices(point, &mut issues);
        self.validate_ohlc_invariants(point, &mut issues);
        self.validate_price_range(point, &mut issues);
        self.validate_volume(point, &mut issues);
        issues
    }

    /// Validate individual prices are non-negative.
    fn validate_prices(&self, point: &PricePoint, issues: &mut Vec<ValidationIssue>) {
        if !self.config.reject_negative_prices {
            return;
        }
        let fields = [
            ("open", point.open),
            ("high", point.high),
            ("low", point.low),
            ("close", point.close),
        ];
        for (name, value) in fields {
            if value < Decimal::ZERO {
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Hard,
                    message: format!("Negative {} price: {}", name, value),
                });
            }
        }
    }

    /// Validate OHLC invariants.
    ///
    /// - High must be >= Low
    /// - Open must be between Low and High
    /// - Close must be between Low and High
    fn validate_ohlc_invariants(&self, point: &PricePoint, issues: &mut Vec<ValidationIssue>) {
        if !self.config.reject_invalid_ohlc {
            return;
        }
        let (high, low) = (point.high, point.low);

        if high < low {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!("High ({}) is less than Low ({})", high, low),
            });
            return;
        }

        if point.open < low || point.open > high {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Soft,
                message: format!(
                    "Open ({}) is outside High/Low range ({}-{})",
                    point.open, low, high
                ),
            });
        }

        if point.close < low || point.close > high {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Soft,
                message: format!(
                    "Close ({}) is outside High/Low range ({}-{})",
                    point.close, low, high
                ),
            });
        }
    }

    /// Validate prices are within reasonable range.
    fn validate_price_range(&self, point: &PricePoint, issues: &mut Vec<ValidationIssue>) {
        if let Some(max_price) = self.config.max_price {
            if point.close > max_price {
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Hard,
                    message: format!(
                        "Close price ({}) exceeds sanity limit ({})",
                        point.close, max_price
                    ),
                });
            }
        }
    }

    /// Validate volume data.
    fn validate_volume(&self, point: &PricePoint, issues: &mut Vec<ValidationIssue>) {
        if point.volume < Decimal::ZERO {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!("Negative volume: {}", point.volume),
            });
        }

        if self.config.warn_on_zero_volume && point.volume == Decimal::ZERO {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Soft,
                message: "Zero volume".to_string(),
            });
        }
    }
}
