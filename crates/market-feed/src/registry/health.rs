//! Provider health tracking.
//!
//! Keeps one [`ProviderRecord`] per provider: a reputation score used for
//! ranking, success/failure counters, and a temporary disablement that kicks
//! in after too many consecutive failures and lifts itself after a cool-down.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{to_delta, Clock};
use crate::events::ProviderSwitch;
use crate::provider::duration_millis;
use crate::storage::{Storage, StorageError, PROVIDER_HEALTH_KEY};

const MAX_HEALTH: u8 = 100;

/// Health and bookkeeping for one provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    pub id: String,
    pub display_name: String,
    /// Lower value = preferred when health is equal.
    pub priority: i32,
    /// Administrative switch; disabled providers are never selected.
    pub enabled: bool,
    /// Reputation in `0..=100`.
    pub health_score: u8,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_message: Option<String>,
    /// Set while the provider is cooling down after repeated failures.
    pub disabled_until: Option<DateTime<Utc>>,
}

impl ProviderRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            priority,
            enabled: true,
            health_score: MAX_HEALTH,
            consecutive_failures: 0,
            success_count: 0,
            failure_count: 0,
            last_failure_at: None,
            last_failure_message: None,
            disabled_until: None,
        }
    }

    pub fn with_health(mut self, health_score: u8) -> Self {
        self.health_score = health_score.min(MAX_HEALTH);
        self
    }

    /// Whether the provider can be selected right now.
    pub fn is_available(&self) -> bool {
        self.enabled && self.disabled_until.is_none()
    }

    /// Lift an expired cool-down.
    fn refresh(&mut self, now: DateTime<Utc>) {
        if let Some(until) = self.disabled_until {
            if now >= until {
                info!("Provider '{}' cool-down expired, re-enabling", self.id);
                self.disabled_until = None;
                self.consecutive_failures = 0;
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthConfig {
    /// Consecutive failures that take a provider out of rotation.
    pub max_consecutive_failures: u32,
    /// How long a provider stays out of rotation.
    #[serde(with = "duration_millis")]
    pub cooldown: Duration,
    pub success_delta: u8,
    pub failure_delta: u8,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown: Duration::from_secs(5 * 60),
            success_delta: 5,
            failure_delta: 10,
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    records: BTreeMap<String, ProviderRecord>,
    /// Provider that served the most recent successful request.
    active_provider: Option<String>,
}

impl HealthState {
    fn record_mut(&mut self, id: &str) -> &mut ProviderRecord {
        self.records.entry(id.to_string()).or_insert_with(|| {
            warn!("Health update for unregistered provider '{}'", id);
            ProviderRecord::new(id, id, 10)
        })
    }
}

/// Tracks provider health for ranking and temporary disablement.
pub struct ProviderHealthTracker {
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    state: Mutex<HealthState>,
}

impl ProviderHealthTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, HealthConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: HealthConfig) -> Self {
        Self {
            clock,
            config,
            state: Mutex::new(HealthState::default()),
        }
    }

    /// Lock the state mutex, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Health tracker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Add a provider, replacing any record with the same id.
    pub fn register(&self, record: ProviderRecord) {
        debug!(
            "Registering provider '{}' (priority {}, health {})",
            record.id, record.priority, record.health_score
        );
        self.lock_state().records.insert(record.id.clone(), record);
    }

    /// Record a successful request.
    ///
    /// Resets the consecutive-failure counter and any cool-down. Returns a
    /// switch when a different provider served the previous request.
    pub fn record_success(&self, id: &str) -> Option<ProviderSwitch> {
        self.apply_success(id, true)
    }

    /// Record a success from a cross-check fetch.
    ///
    /// Updates health like [`record_success`](Self::record_success) but does
    /// not change which provider counts as serving.
    pub fn record_audit_success(&self, id: &str) {
        self.apply_success(id, false);
    }

    fn apply_success(&self, id: &str, serving: bool) -> Option<ProviderSwitch> {
        let mut state = self.lock_state();
        let record = state.record_mut(id);
        record.success_count += 1;
        record.consecutive_failures = 0;
        record.disabled_until = None;
        record.health_score = record
            .health_score
            .saturating_add(self.config.success_delta)
            .min(MAX_HEALTH);

        if !serving {
            return None;
        }
        let previous = state.active_provider.replace(id.to_string());
        match previous {
            Some(from) if from != id => {
                info!("Serving provider switched from '{}' to '{}'", from, id);
                Some(ProviderSwitch {
                    from,
                    to: id.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Record a failed request.
    ///
    /// Returns `true` when this failure took the provider out of rotation.
    pub fn record_failure(&self, id: &str, message: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let record = state.record_mut(id);
        record.refresh(now);

        record.failure_count += 1;
        record.consecutive_failures += 1;
        record.health_score = record
            .health_score
            .saturating_sub(self.config.failure_delta);
        record.last_failure_at = Some(now);
        record.last_failure_message = Some(message.to_string());

        if record.disabled_until.is_none()
            && record.consecutive_failures >= self.config.max_consecutive_failures
        {
            let until = now + to_delta(self.config.cooldown);
            warn!(
                "Provider '{}' disabled until {} after {} consecutive failures",
                id, until, record.consecutive_failures
            );
            record.disabled_until = Some(until);
            return true;
        }

        debug!(
            "Provider '{}' failure {}/{} (health {})",
            id,
            record.consecutive_failures,
            self.config.max_consecutive_failures,
            record.health_score
        );
        false
    }

    /// Selectable providers, healthiest first, ties broken by priority.
    pub fn available_providers(&self) -> Vec<ProviderRecord> {
        let now = self.clock.now();
        let mut state = self.lock_state();

        let mut available: Vec<ProviderRecord> = state
            .records
            .values_mut()
            .map(|record| {
                record.refresh(now);
                record
            })
            .filter(|record| record.is_available())
            .map(|record| record.clone())
            .collect();

        available.sort_by(|a, b| {
            b.health_score
                .cmp(&a.health_score)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.id.cmp(&b.id))
        });
        available
    }

    pub fn record(&self, id: &str) -> Option<ProviderRecord> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.records.get_mut(id).map(|record| {
            record.refresh(now);
            record.clone()
        })
    }

    /// All records, sorted by id.
    pub fn records(&self) -> Vec<ProviderRecord> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state
            .records
            .values_mut()
            .map(|record| {
                record.refresh(now);
                record.clone()
            })
            .collect()
    }

    /// Administratively enable or disable a provider.
    ///
    /// Returns `false` when the provider is unknown.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.lock_state().records.get_mut(id) {
            Some(record) => {
                info!(
                    "Provider '{}' {}",
                    id,
                    if enabled { "enabled" } else { "disabled" }
                );
                record.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Provider that served the most recent successful request.
    pub fn active_provider(&self) -> Option<String> {
        self.lock_state().active_provider.clone()
    }

    /// Write all records to storage.
    pub fn persist(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        let records = self.records();
        let blob = serde_json::to_string(&records)?;
        storage.set(PROVIDER_HEALTH_KEY, &blob)?;
        debug!("Persisted health for {} providers", records.len());
        Ok(())
    }

    /// Load persisted health into registered providers.
    ///
    /// Registration owns `display_name` and `priority`; everything else is
    /// taken from storage. Unknown ids are ignored. Returns how many records
    /// were restored.
    pub fn restore(&self, storage: &dyn Storage) -> Result<usize, StorageError> {
        let Some(blob) = storage.get(PROVIDER_HEALTH_KEY)? else {
            return Ok(0);
        };
        let stored: Vec<ProviderRecord> = serde_json::from_str(&blob)?;

        let mut state = self.lock_state();
        let mut restored = 0;
        for saved in stored {
            match state.records.get_mut(&saved.id) {
                Some(record) => {
                    record.enabled = saved.enabled;
                    record.health_score = saved.health_score.min(MAX_HEALTH);
                    record.consecutive_failures = saved.consecutive_failures;
                    record.success_count = saved.success_count;
                    record.failure_count = saved.failure_count;
                    record.last_failure_at = saved.last_failure_at;
                    record.last_failure_message = saved.last_failure_message;
                    record.disabled_until = saved.disabled_until;
                    restored += 1;
                }
                None => debug!("Ignoring persisted health for unknown provider '{}'", saved.id),
            }
        }
        info!("Restored health for {} providers", restored);
        Ok(restored)
    }
}
