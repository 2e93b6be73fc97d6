//! Engine configuration.

use crate::error::{RepairError, Result};
use crate::types::DiffusionKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default drift tolerance between cache and durable max-seq.
pub const DEFAULT_DRIFT_WARN_THRESHOLD: u64 = 10;

/// Default interval between scheduled retention runs (one day).
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 24 * 60 * 60;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// How much history to keep and how much tier divergence to tolerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Messages older than this are expired.
    pub window: Duration,

    /// Warn when |durable max - cache max| exceeds this.
    pub drift_warn_threshold: u64,
}

impl RetentionPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            drift_warn_threshold: DEFAULT_DRIFT_WARN_THRESHOLD,
        }
    }

    pub fn days(days: u64) -> Self {
        Self::new(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
    }

    pub fn with_drift_warn_threshold(mut self, threshold: u64) -> Self {
        self.drift_warn_threshold = threshold;
        self
    }
}

/// Engine configuration, usually loaded from JSON.
///
/// ```json
/// { "retain_days": 30, "workers": 8, "group_fanout_kind": "read_diffusion" }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chat history retention in days.
    pub retain_days: u64,

    pub drift_warn_threshold: u64,

    /// Whether the periodic retention job may run.
    pub scheduled_enabled: bool,

    pub schedule_interval_secs: u64,

    /// Worker threads per sweep stage.
    pub workers: usize,

    /// Fan-out kind whose groups the scheduled run sweeps.
    pub group_fanout_kind: DiffusionKind,

    /// Stop starting new entities after this many seconds.
    pub run_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retain_days: 14,
            drift_warn_threshold: DEFAULT_DRIFT_WARN_THRESHOLD,
            scheduled_enabled: true,
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            workers: 1,
            group_fanout_kind: DiffusionKind::ReadDiffusion,
            run_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retain_days == 0 {
            return Err(RepairError::InvalidConfig(
                "retain_days must be at least 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(RepairError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }
        if self.schedule_interval_secs == 0 {
            return Err(RepairError::InvalidConfig(
                "schedule_interval_secs must be at least 1".into(),
            ));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(RepairError::InvalidConfig(
                "run_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::days(self.retain_days).with_drift_warn_threshold(self.drift_warn_threshold)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}
