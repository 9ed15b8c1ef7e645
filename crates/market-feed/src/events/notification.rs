//! Notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorType;

/// Events emitted by the orchestrator as a side channel to the fetch result.
///
/// Hosts use these to surface which provider is serving data and when one
/// drops out; nothing in the fetch path depends on them being delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Notification {
    /// A provider served a request.
    #[serde(rename_all = "camelCase")]
    DataSourceSuccess {
        provider: String,
        symbol: String,
        point_count: usize,
        fallback_used: bool,
        at: DateTime<Utc>,
    },

    /// A provider was given up on for a request.
    #[serde(rename_all = "camelCase")]
    DataSourceFailure {
        provider: String,
        symbol: String,
        error_type: ErrorType,
        message: String,
        /// The provider was taken out of rotation by this failure.
        disabled: bool,
        at: DateTime<Utc>,
    },

    /// The provider serving requests changed.
    #[serde(rename_all = "camelCase")]
    ProviderSwitch {
        from: String,
        to: String,
        at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn provider(&self) -> &str {
        match self {
            Self::DataSourceSuccess { provider, .. } | Self::DataSourceFailure { provider, .. } => {
                provider
            }
            Self::ProviderSwitch { to, .. } => to,
        }
    }
}

/// Serving-provider change reported by the health tracker.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSwitch {
    pub from: String,
    pub to: String,
}

impl ProviderSwitch {
    pub fn into_notification(self, at: DateTime<Utc>) -> Notification {
        Notification::ProviderSwitch {
            from: self.from,
            to: self.to,
            at,
        }
    }
}
