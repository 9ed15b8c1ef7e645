//! Market Feed Crate
//!
//! This crate fetches daily and intraday OHLCV series from interchangeable
//! upstream providers and keeps serving when some of them misbehave.
//!
//! # Overview
//!
//! The market feed crate supports:
//! - Any number of providers behind the [`ProviderClient`] capability
//! - Per-provider rate limiting, circuit breaking and retries
//! - Health-ranked fallback with optional load balancing
//! - Cross-checking two providers' series for the same symbol
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |  QuoteRequest    |  (validated symbol, timeframe, range)
//! +------------------+
//!          |
//!          v
//! +----------------------+     +------------------+
//! | ProviderOrchestrator | --> |  Health tracker  |  (ranking, cool-down)
//! +----------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! |  RetryScheduler  |  (backoff, cancellation)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |   RateLimiter    |  (minute window, daily cap)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |  CircuitBreaker  |  (closed / open / half-open)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |  ProviderClient  |  (wire protocol)
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------------+
//! |   TimeSeries     | --> | ConsistencyReconciler  |  (audited fetches)
//! +------------------+     +------------------------+
//! ```
//!
//! # Core Types
//!
//! - [`QuoteRequest`] - What the caller asks for
//! - [`TimeSeries`] - Validated bars, newest first, with provenance
//! - [`ConsistencyReport`] - Comparison of two providers' series
//! - [`MarketDataError`] - Normalized failure taxonomy
//! - [`Clock`] - Injectable time source used by every timed component

pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod provider;
pub mod reconcile;
pub mod registry;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FeedConfig};
pub use errors::{ErrorResponse, ErrorType, MarketDataError};

// Re-export all public types from models
pub use models::{
    ConsistencyReport, DataOrigin, Discrepancy, DiscrepancyKind, DiscrepancySeverity,
    PricePoint, ProviderId, ProviderPreference, QuoteRequest, QualityScore, RecommendedSource,
    SeriesMetadata, TimeSeries, Timeframe,
};

// Re-export provider types
pub use provider::{ClientError, ProviderClient, ProviderSeries, RateLimit, RetryPolicy};

pub use reconcile::{ConsistencyReconciler, ReconcilerConfig};

// Re-export registry types
pub use registry::{
    AuditedSeries, CircuitBreaker, CircuitState, FetchDiagnostics, ProviderAttempt,
    ProviderHealthTracker, ProviderOrchestrator, QuoteValidator, RateLimiter, RetryScheduler,
};

pub use events::{Notification, NotificationSink};
pub use storage::{InMemoryStorage, JsonFileStorage, Storage, StorageError};
