use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use market_feed::{ConsistencyReconciler, ConsistencyReport, FeedConfig, TimeSeries};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let log_format = std::env::var("MF_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

#[derive(Parser, Debug, PartialEq)]
#[command(name = "reconcile-cli")]
#[command(about = "Cross-check two providers' series for the same symbol")]
pub struct Args {
    /// First series document (JSON)
    pub series_a: PathBuf,

    /// Second series document (JSON)
    pub series_b: PathBuf,

    /// Symbol to report under; defaults to the symbol of the first series
    #[arg(short, long)]
    pub symbol: Option<String>,
}

fn read_series(path: &Path) -> anyhow::Result<TimeSeries> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let series: TimeSeries = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a time series document", path.display()))?;
    tracing::debug!(
        "Loaded {} points for {} from {}",
        series.len(),
        series.symbol,
        path.display()
    );
    Ok(series)
}

/// Reconcile the two series named in `args` using `MF_*` configuration.
pub fn run(args: &Args) -> anyhow::Result<ConsistencyReport> {
    let config = FeedConfig::from_env().context("invalid feed configuration")?;
    let a = read_series(&args.series_a)?;
    let b = read_series(&args.series_b)?;

    let symbol = args.symbol.clone().unwrap_or_else(|| a.symbol.clone());
    if !a.symbol.eq_ignore_ascii_case(&b.symbol) {
        tracing::warn!(
            "Series symbols differ ({} vs {}), reporting as {}",
            a.symbol,
            b.symbol,
            symbol
        );
    }

    let report = ConsistencyReconciler::with_config(config.reconciler).reconcile(&a, &b, &symbol);
    tracing::info!(
        "{}: {} discrepancies, quality {:.2}, confidence {:.4}, recommended {}",
        report.symbol,
        report.discrepancies.len(),
        report.quality_score.overall,
        report.confidence,
        String::from(report.recommended_source.clone())
    );
    Ok(report)
}
