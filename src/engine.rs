//! Run-mode orchestration.
//!
//! [`RepairEngine`] owns the configuration and the event bus and exposes the
//! three entry points: the periodic retention run, single-group repair and
//! the emergency full sweep. It keeps no state between runs; every
//! invocation recomputes from what the store holds now.

use crate::config::EngineConfig;
use crate::context::{CancelToken, RunContext, RunMode};
use crate::error::{NotFoundAsZero, Population, RepairError, Result, StoreError};
use crate::events::{EventBus, RepairEvent};
use crate::pool::WorkerPool;
use crate::repair::EntityRef;
use crate::report::{EntityOutcome, RunReport, SkippedStage, Stage, StageReport};
use crate::sweeper::RetentionSweeper;
use crate::tiers::{PopulationEnumerator, SequenceStore};
use crate::types::{
    DiffusionKind, GroupId, GroupSeqRecord, MemberCursor, UserId, UserSeqRecord,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Entry point for retention and cursor repair.
pub struct RepairEngine<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    enumerator: Arc<P>,
    config: EngineConfig,
    events: EventBus,
    invocations: AtomicU64,
    cancel: CancelToken,
}

impl<T> RepairEngine<T, T>
where
    T: SequenceStore + PopulationEnumerator,
{
    /// Engine over one backend that serves both contracts.
    pub fn from_shared(backend: Arc<T>, config: EngineConfig) -> Result<Self> {
        Self::new(Arc::clone(&backend), backend, config)
    }
}

impl<S, P> RepairEngine<S, P>
where
    S: SequenceStore + ?Sized,
    P: PopulationEnumerator + ?Sized,
{
    pub fn new(store: Arc<S>, enumerator: Arc<P>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            enumerator,
            config,
            events: EventBus::new(),
            invocations: AtomicU64::new(0),
            cancel: CancelToken::new(),
        })
    }

    /// Use `cancel` as the parent token of every run.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Cancelling this token stops every current and future run.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    // --- Run modes ---

    /// Periodic retention run: users first, then fan-out groups.
    ///
    /// Never fails. A population that cannot be listed has its stage
    /// skipped and recorded in the report; the other stage still runs.
    pub fn scheduled_retention_run(&self) -> RunReport {
        let ctx = self.begin(RunMode::ScheduledRetention);
        let policy = self.config.retention_policy();
        let sweeper = self.sweeper();
        let mut report = RunReport::new(&ctx);

        match self.enumerator.list_all_user_ids(&ctx) {
            Ok(users) => report.users = Some(sweeper.clear_users(&ctx, users, &policy)),
            Err(error) => self.skip_stage(&ctx, &mut report, Stage::Users, Population::Users, error),
        }

        match self
            .enumerator
            .list_group_ids_by_kind(&ctx, self.config.group_fanout_kind)
        {
            Ok(groups) => report.groups = Some(sweeper.clear_groups(&ctx, groups, &policy)),
            Err(error) => {
                self.skip_stage(&ctx, &mut report, Stage::Groups, Population::Groups, error)
            }
        }

        report.cancelled = stage_cancelled(&report);
        self.finish(&ctx, &report);
        report
    }

    /// Repair one group's member cursors and check its drift. Deletes nothing.
    pub fn on_demand_group_repair(&self, group: &GroupId) -> Result<RunReport> {
        let ctx = self.begin(RunMode::OnDemandGroupRepair);
        let mut report = RunReport::new(&ctx);

        if ctx.is_cancelled() {
            return Err(self.abort_cancelled(&ctx, report));
        }

        let members = match self.enumerator.list_group_member_ids(&ctx, group) {
            Ok(members) => members,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::engine",
                    stage = "list_members",
                    correlation_id = ctx.run_id(),
                    group_id = %group,
                    error = %error,
                    "list group members failed"
                );
                self.finish(&ctx, &report);
                return Err(RepairError::enumeration(Population::GroupMembers, error));
            }
        };

        let sweeper = self.sweeper();
        let outcome = match sweeper.repair_group(
            &ctx,
            group,
            &members,
            self.config.drift_warn_threshold,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                let outcome = EntityOutcome::failed(EntityRef::Group(group.clone()), &error);
                sweeper.publish(&ctx, &outcome);
                let mut stage = StageReport::default();
                stage.absorb(outcome);
                report.groups = Some(stage);
                self.finish(&ctx, &report);
                return Err(error.into());
            }
        };

        sweeper.publish(&ctx, &outcome);
        let mut stage = StageReport::default();
        stage.absorb(outcome);
        report.groups = Some(stage);

        self.finish(&ctx, &report);
        Ok(report)
    }

    /// Emergency clamp-only sweep over every user and every group.
    ///
    /// All populations are listed before any cursor is touched; if any
    /// listing fails the run stops with no store mutation.
    pub fn full_sweep_repair(&self) -> Result<RunReport> {
        let ctx = self.begin(RunMode::FullSweep);
        let mut report = RunReport::new(&ctx);

        let populations = self.list_full_population(&ctx);
        let (users, groups) = match populations {
            Ok(populations) => populations,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::engine",
                    stage = "enumerate",
                    correlation_id = ctx.run_id(),
                    error = %error,
                    "full sweep aborted before any repair"
                );
                self.finish(&ctx, &report);
                return Err(error);
            }
        };

        let sweeper = self.sweeper();
        report.users = Some(sweeper.clamp_users(&ctx, users));
        report.groups = Some(sweeper.clamp_groups(&ctx, groups));

        if stage_cancelled(&report) {
            return Err(self.abort_cancelled(&ctx, report));
        }

        self.finish(&ctx, &report);
        Ok(report)
    }

    // --- Inspection ---

    /// Current sequence state of a user. A user with no recorded state
    /// reads as all zeros.
    pub fn inspect_user(&self, user: &UserId) -> Result<UserSeqRecord> {
        let ctx = self.context(RunMode::Inspection);
        let range = self.store.get_user_seq_range(&ctx, user).or_zero()?;
        Ok(UserSeqRecord::from_range(user.clone(), range))
    }

    pub fn inspect_group(&self, group: &GroupId) -> Result<GroupSeqRecord> {
        let ctx = self.context(RunMode::Inspection);
        let diffusion_kind = self.enumerator.group_diffusion_kind(&ctx, group)?;
        let range = self.store.get_group_seq_range(&ctx, group)?;
        Ok(GroupSeqRecord {
            group_id: group.clone(),
            diffusion_kind,
            cache_max_seq: range.cache_max.unwrap_or_default(),
            durable_max_seq: range.durable_max,
        })
    }

    pub fn inspect_member(&self, group: &GroupId, user: &UserId) -> Result<MemberCursor> {
        let ctx = self.context(RunMode::Inspection);
        let min_seq = self
            .store
            .get_group_member_min_seq(&ctx, group, user)
            .or_zero()?;
        Ok(MemberCursor {
            group_id: group.clone(),
            user_id: user.clone(),
            min_seq,
        })
    }

    // --- Internals ---

    fn context(&self, mode: RunMode) -> RunContext {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst);
        let cancel = self.cancel.child_with_timeout(self.config.run_timeout());
        RunContext::new(mode, invocation, cancel)
    }

    fn sweeper(&self) -> RetentionSweeper<'_, S, P> {
        RetentionSweeper::new(
            &*self.store,
            &*self.enumerator,
            &self.events,
            WorkerPool::new(self.config.workers),
        )
    }

    fn begin(&self, mode: RunMode) -> RunContext {
        let ctx = self.context(mode);
        tracing::info!(
            target: "seqwarden::engine",
            stage = "start",
            correlation_id = ctx.run_id(),
            mode = %mode,
            retain_days = self.config.retain_days,
            workers = self.config.workers,
            "repair run started"
        );
        self.events.publish(RepairEvent::RunStarted {
            run_id: ctx.run_id().to_string(),
            mode: mode.as_str().to_string(),
        });
        ctx
    }

    fn finish(&self, ctx: &RunContext, report: &RunReport) {
        let summary = report.summary();
        tracing::info!(
            target: "seqwarden::engine",
            stage = "finish",
            correlation_id = ctx.run_id(),
            mode = %ctx.mode(),
            users_attempted = summary.users_attempted,
            users_failed = summary.users_failed,
            groups_attempted = summary.groups_attempted,
            groups_failed = summary.groups_failed,
            clamps = summary.clamps,
            drift_warnings = summary.drift_warnings,
            cancelled = summary.cancelled,
            "repair run finished"
        );
        self.events.publish(RepairEvent::RunFinished { summary });
    }

    fn abort_cancelled(&self, ctx: &RunContext, mut report: RunReport) -> RepairError {
        report.cancelled = true;
        self.finish(ctx, &report);
        RepairError::Cancelled {
            run_id: ctx.run_id().to_string(),
        }
    }

    fn skip_stage(
        &self,
        ctx: &RunContext,
        report: &mut RunReport,
        stage: Stage,
        population: Population,
        error: StoreError,
    ) {
        tracing::error!(
            target: "seqwarden::engine",
            stage = %stage,
            correlation_id = ctx.run_id(),
            population = %population,
            error = %error,
            "population listing failed, stage skipped"
        );
        let reason = error.to_string();
        self.events.publish(RepairEvent::StageSkipped {
            run_id: ctx.run_id().to_string(),
            stage,
            reason: reason.clone(),
        });
        report.skipped_stages.push(SkippedStage { stage, reason });
    }

    fn list_full_population(&self, ctx: &RunContext) -> Result<(Vec<UserId>, Vec<GroupId>)> {
        let users = self
            .enumerator
            .list_all_user_ids(ctx)
            .map_err(|e| RepairError::enumeration(Population::Users, e))?;

        let mut groups = Vec::new();
        for kind in [DiffusionKind::WriteDiffusion, DiffusionKind::ReadDiffusion] {
            let ids = self
                .enumerator
                .list_group_ids_by_kind(ctx, kind)
                .map_err(|e| RepairError::enumeration(Population::Groups, e))?;
            groups.extend(ids);
        }
        Ok((users, groups))
    }
}

fn stage_cancelled(report: &RunReport) -> bool {
    report
        .users
        .iter()
        .chain(report.groups.iter())
        .any(|stage| stage.not_started > 0)
}
