//! Provider registry module.
//!
//! This module provides orchestration for market data providers, including:
//! - Provider health, ranking and preference
//! - Rate limiting per provider
//! - Circuit breaking for fault tolerance
//! - Retries with backoff and cancellation
//! - Price point validation
//! - Per-fetch diagnostics

mod circuit_breaker;
mod diagnostics;
mod health;
mod orchestrator;
mod rate_limiter;
mod retry;
mod validator;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
};
pub use diagnostics::{FetchDiagnostics, ProviderAttempt};
pub use health::{HealthConfig, ProviderHealthTracker, ProviderRecord};
pub use orchestrator::{AuditedSeries, OrchestratorConfig, ProviderOrchestrator, Resilience};
pub use rate_limiter::{LimitCause, RateDecision, RateLimiter, RateUsage};
pub use retry::{
    ErrorCallback, ProgressCallback, RetryContext, RetryOptions, RetryProgress, RetryScheduler,
    SuccessCallback,
};
pub use validator::{QuoteValidator, ValidationIssue, ValidationSeverity, ValidatorConfig};
