//! Outcome summaries of engine runs.

use crate::context::{RunContext, RunMode};
use crate::repair::{ConsistencyWarning, EntityRef};
use serde::Serialize;
use std::fmt;

/// A population-wide pass inside a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Users,
    Groups,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Users => f.write_str("users"),
            Stage::Groups => f.write_str("groups"),
        }
    }
}

/// What happened to one entity.
#[derive(Clone, Debug)]
pub struct EntityOutcome {
    pub entity: EntityRef,
    pub warnings: Vec<ConsistencyWarning>,
    /// Why the entity was abandoned, if it was.
    pub error: Option<String>,
    /// Group members whose cursor could not be read or repaired.
    pub member_failures: usize,
}

impl EntityOutcome {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            warnings: Vec::new(),
            error: None,
            member_failures: 0,
        }
    }

    pub fn failed(entity: EntityRef, reason: impl fmt::Display) -> Self {
        let mut outcome = Self::new(entity);
        outcome.error = Some(reason.to_string());
        outcome
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated result of one stage.
#[derive(Clone, Debug, Default)]
pub struct StageReport {
    /// Entities whose processing started.
    pub attempted: usize,
    pub failed: usize,
    pub member_failures: usize,
    /// Entities skipped because the run was cancelled.
    pub not_started: usize,
    pub warnings: Vec<ConsistencyWarning>,
    pub failures: Vec<(EntityRef, String)>,
}

impl StageReport {
    pub fn absorb(&mut self, outcome: EntityOutcome) {
        self.attempted += 1;
        self.member_failures += outcome.member_failures;
        self.warnings.extend(outcome.warnings);
        if let Some(reason) = outcome.error {
            self.failed += 1;
            self.failures.push((outcome.entity, reason));
        }
    }

    pub fn clamp_count(&self) -> usize {
        self.warnings.iter().filter(|w| w.is_clamp()).count()
    }

    pub fn drift_count(&self) -> usize {
        self.warnings.iter().filter(|w| w.is_drift()).count()
    }
}

/// A stage that never ran because its population could not be listed.
#[derive(Clone, Debug)]
pub struct SkippedStage {
    pub stage: Stage,
    pub reason: String,
}

/// Result of one engine invocation.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub run_id: String,
    pub mode: RunMode,
    pub users: Option<StageReport>,
    pub groups: Option<StageReport>,
    pub skipped_stages: Vec<SkippedStage>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id().to_string(),
            mode: ctx.mode(),
            users: None,
            groups: None,
            skipped_stages: Vec::new(),
            cancelled: false,
        }
    }

    fn stages(&self) -> impl Iterator<Item = &StageReport> {
        self.users.iter().chain(self.groups.iter())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConsistencyWarning> {
        self.stages().flat_map(|s| s.warnings.iter())
    }

    pub fn clamp_count(&self) -> usize {
        self.stages().map(StageReport::clamp_count).sum()
    }

    pub fn drift_count(&self) -> usize {
        self.stages().map(StageReport::drift_count).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.stages().map(|s| s.failed).sum()
    }

    pub fn was_skipped(&self, stage: Stage) -> bool {
        self.skipped_stages.iter().any(|s| s.stage == stage)
    }

    pub fn summary(&self) -> RunSummary {
        let users = self.users.as_ref();
        let groups = self.groups.as_ref();
        RunSummary {
            run_id: self.run_id.clone(),
            mode: self.mode.as_str().to_string(),
            users_attempted: users.map_or(0, |s| s.attempted),
            users_failed: users.map_or(0, |s| s.failed),
            groups_attempted: groups.map_or(0, |s| s.attempted),
            groups_failed: groups.map_or(0, |s| s.failed),
            member_failures: self.stages().map(|s| s.member_failures).sum(),
            clamps: self.clamp_count(),
            drift_warnings: self.drift_count(),
            skipped_stages: self.skipped_stages.iter().map(|s| s.stage).collect(),
            cancelled: self.cancelled,
        }
    }
}

/// Flat, serializable digest of a [`RunReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: String,
    pub users_attempted: usize,
    pub users_failed: usize,
    pub groups_attempted: usize,
    pub groups_failed: usize,
    pub member_failures: usize,
    pub clamps: usize,
    pub drift_warnings: usize,
    pub skipped_stages: Vec<Stage>,
    pub cancelled: bool,
}
