//! Repair event types.

use crate::repair::{ConsistencyWarning, EntityRef};
use crate::report::{RunSummary, Stage};
use serde::Serialize;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: EventFilter::all(),
        }
    }
}

/// Which events a subscriber receives.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// Clamp and drift warnings.
    pub include_warnings: bool,

    /// Per-entity failures and skipped stages.
    pub include_failures: bool,

    /// Run started / finished.
    pub include_lifecycle: bool,
}

impl EventFilter {
    pub fn warnings() -> Self {
        Self {
            include_warnings: true,
            ..Default::default()
        }
    }

    pub fn failures() -> Self {
        Self {
            include_failures: true,
            ..Default::default()
        }
    }

    pub fn lifecycle() -> Self {
        Self {
            include_lifecycle: true,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            include_warnings: true,
            include_failures: true,
            include_lifecycle: true,
        }
    }

    pub(crate) fn matches(&self, event: &RepairEvent) -> bool {
        match event {
            RepairEvent::Warning { .. } => self.include_warnings,
            RepairEvent::EntityFailed { .. } | RepairEvent::StageSkipped { .. } => {
                self.include_failures
            }
            RepairEvent::RunStarted { .. } | RepairEvent::RunFinished { .. } => {
                self.include_lifecycle
            }
            RepairEvent::Dropped { .. } => true,
        }
    }
}

/// Events emitted while the engine runs.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairEvent {
    RunStarted {
        run_id: String,
        mode: String,
    },

    /// A clamp or drift warning.
    Warning {
        run_id: String,
        warning: ConsistencyWarning,
    },

    /// An entity was abandoned for this run.
    EntityFailed {
        run_id: String,
        entity: EntityRef,
        reason: String,
    },

    /// A population could not be listed, so its stage did not run.
    StageSkipped {
        run_id: String,
        stage: Stage,
        reason: String,
    },

    RunFinished {
        summary: RunSummary,
    },

    /// Subscription was dropped.
    Dropped {
        reason: DropReason,
    },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<RepairEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<RepairEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<RepairEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<RepairEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now.
    pub fn drain(&self) -> Vec<RepairEvent> {
        self.receiver.try_iter().collect()
    }
}
