//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Timing and channel sizes of the calculation scheduler.
///
/// Durations are stored in milliseconds. Missing fields take their default
/// when deserializing.
///
/// ```rust
/// use std::time::Duration;
/// use modcalc::config::SchedulerConfig;
///
/// let config = SchedulerConfig::from_json(r#"{ "debounce_ms": 250 }"#).unwrap();
/// assert_eq!(config.debounce(), Duration::from_millis(250));
/// assert_eq!(config.command_buffer_size, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiet period after the last debounced update before the batch is
    /// applied.
    pub debounce_ms: u64,
    /// How often the idle check for reclamation runs.
    pub reclamation_interval_ms: u64,
    /// Time without commands after which the calculator counts as idle.
    pub idle_threshold_ms: u64,
    pub command_buffer_size: usize,
    /// Capacity of the value-change broadcast channel.
    pub event_buffer_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            reclamation_interval_ms: 5_000,
            idle_threshold_ms: 1_000,
            command_buffer_size: 64,
            event_buffer_size: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> Result<Self, SchedulerError> {
        serde_json::from_str(json).map_err(SchedulerError::Config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reclamation_interval(&self) -> Duration {
        // A zero period would make the interval timer panic.
        Duration::from_millis(self.reclamation_interval_ms.max(1))
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = millis(debounce);
        self
    }

    pub fn with_reclamation(mut self, interval: Duration, idle_threshold: Duration) -> Self {
        self.reclamation_interval_ms = millis(interval);
        self.idle_threshold_ms = millis(idle_threshold);
        self
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
