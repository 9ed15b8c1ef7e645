//! Market data provider abstractions.
//!
//! This module contains:
//! - The `ProviderClient` capability every upstream source is wrapped in
//! - Request budgets (`RateLimit`) and retry policies (`RetryPolicy`)
//! - `ClientError`, the raw failure a client may report, and its
//!   normalization into the crate's error taxonomy
//!
//! # Architecture
//!
//! The provider system is designed to be:
//! - **Provider-agnostic**: The orchestrator doesn't know about specific providers
//! - **Injectable**: Wire protocols live behind `ProviderClient`; tests script them
//! - **Resilient**: Rate limiting, circuit breakers and retries wrap every call

mod capabilities;
mod client_error;
mod traits;

pub(crate) use capabilities::duration_millis;
pub use capabilities::{RateLimit, RetryPolicy};
pub use client_error::ClientError;
pub use traits::{ProviderClient, ProviderSeries};
