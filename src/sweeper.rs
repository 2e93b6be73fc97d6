//! Population sweeps: retention deletes plus cursor repair.
//!
//! Every entity is handled independently. A store failure on one entity is
//! logged and recorded in its [`EntityOutcome`]; the rest of the population
//! still runs. Within an entity the steps are strictly ordered
//! (delete, re-read, clamp, drift check) so a clamp never uses a max-seq
//! read before the delete. A failed delete does not stop the cursor repair.
//!
//! Missing min-seq cursors read as 0. A missing cache max-seq is never
//! read as 0: the entity fails and its cursors stay where they are.

use crate::config::RetentionPolicy;
use crate::context::RunContext;
use crate::error::{NotFoundAsZero, StoreError, StoreResult};
use crate::events::{EventBus, RepairEvent};
use crate::pool::WorkerPool;
use crate::repair::{check_drift, clamp_member_cursor, clamp_user_cursor, EntityRef};
use crate::report::{EntityOutcome, Stage, StageReport};
use crate::tiers::{PopulationEnumerator, SequenceStore};
use crate::types::{GroupId, Seq, UserId};

/// Runs per-entity repair jobs over a population.
pub struct RetentionSweeper<'a, S: ?Sized, P: ?Sized> {
    store: &'a S,
    enumerator: &'a P,
    events: &'a EventBus,
    pool: WorkerPool,
}

impl<'a, S, P> RetentionSweeper<'a, S, P>
where
    S: SequenceStore + ?Sized,
    P: PopulationEnumerator + ?Sized,
{
    pub fn new(store: &'a S, enumerator: &'a P, events: &'a EventBus, pool: WorkerPool) -> Self {
        Self {
            store,
            enumerator,
            events,
            pool,
        }
    }

    // --- Stages ---

    /// Delete expired history for each user, then clamp and drift-check.
    pub fn clear_users(
        &self,
        ctx: &RunContext,
        user_ids: Vec<UserId>,
        policy: &RetentionPolicy,
    ) -> StageReport {
        self.run_stage(ctx, Stage::Users, user_ids, |user| {
            self.clear_user(ctx, &user, policy)
        })
    }

    /// Delete expired history for each group, then clamp member cursors
    /// and drift-check.
    pub fn clear_groups(
        &self,
        ctx: &RunContext,
        group_ids: Vec<GroupId>,
        policy: &RetentionPolicy,
    ) -> StageReport {
        self.run_stage(ctx, Stage::Groups, group_ids, |group| {
            self.clear_group(ctx, &group, policy)
        })
    }

    /// Clamp-only pass over users. Deletes nothing.
    pub fn clamp_users(&self, ctx: &RunContext, user_ids: Vec<UserId>) -> StageReport {
        self.run_stage(ctx, Stage::Users, user_ids, |user| self.clamp_user(ctx, &user))
    }

    /// Clamp-only pass over group member cursors. Deletes nothing.
    pub fn clamp_groups(&self, ctx: &RunContext, group_ids: Vec<GroupId>) -> StageReport {
        self.run_stage(ctx, Stage::Groups, group_ids, |group| {
            self.clamp_group(ctx, &group)
        })
    }

    // --- Per-entity steps ---

    pub fn clear_user(
        &self,
        ctx: &RunContext,
        user: &UserId,
        policy: &RetentionPolicy,
    ) -> EntityOutcome {
        let entity = EntityRef::User(user.clone());

        // A failed delete still gets its cursor repaired.
        let delete_error = self
            .store
            .delete_expired_and_advance_min_seq(ctx, user, policy.window)
            .err();
        if let Some(error) = &delete_error {
            tracing::error!(
                target: "seqwarden::sweeper",
                stage = "delete",
                correlation_id = ctx.run_id(),
                user_id = %user,
                error = %error,
                "delete expired user messages failed"
            );
        }

        // Re-read after the delete: ingestion may have advanced max meanwhile.
        let range = match self.store.get_user_seq_range(ctx, user).or_zero() {
            Ok(range) => range,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::sweeper",
                    stage = "fetch_range",
                    correlation_id = ctx.run_id(),
                    user_id = %user,
                    error = %error,
                    "get user seq range failed"
                );
                return EntityOutcome::failed(entity, error);
            }
        };
        let cache_max = match require_cache_max(ctx, &entity, range.cache_max) {
            Ok(max) => max,
            Err(error) => return EntityOutcome::failed(entity, error),
        };

        let mut outcome = EntityOutcome::new(entity);
        match clamp_user_cursor(self.store, ctx, user, range.cache_min, cache_max) {
            Ok(warning) => outcome.warnings.extend(warning),
            Err(error) => outcome.error = Some(error.to_string()),
        }
        outcome.warnings.extend(check_drift(
            ctx,
            &outcome.entity,
            cache_max,
            range.durable_max,
            policy.drift_warn_threshold,
        ));
        if outcome.error.is_none() {
            outcome.error = delete_error.map(|e| e.to_string());
        }

        tracing::debug!(
            target: "seqwarden::sweeper",
            stage = "complete",
            correlation_id = ctx.run_id(),
            user_id = %user,
            cache_min_seq = range.cache_min.0,
            cache_max_seq = cache_max.0,
            "user swept"
        );
        outcome
    }

    pub fn clear_group(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        policy: &RetentionPolicy,
    ) -> EntityOutcome {
        let entity = EntityRef::Group(group.clone());

        let members = match self.enumerator.list_group_member_ids(ctx, group) {
            Ok(members) => members,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::sweeper",
                    stage = "list_members",
                    correlation_id = ctx.run_id(),
                    group_id = %group,
                    error = %error,
                    "list group members failed, group skipped"
                );
                return EntityOutcome::failed(entity, error);
            }
        };

        // A failed delete still gets its cursors repaired.
        let delete_error = self
            .store
            .delete_expired_group_msgs_and_advance_min_seq(ctx, group, &members, policy.window)
            .err();
        if let Some(error) = &delete_error {
            tracing::error!(
                target: "seqwarden::sweeper",
                stage = "delete",
                correlation_id = ctx.run_id(),
                group_id = %group,
                members = members.len(),
                error = %error,
                "delete expired group messages failed"
            );
        }

        let mut outcome =
            match self.group_cursor_pass(ctx, group, &members, policy.drift_warn_threshold) {
                Ok(outcome) => outcome,
                Err(error) => return EntityOutcome::failed(entity, error),
            };
        if outcome.error.is_none() {
            outcome.error = delete_error.map(|e| e.to_string());
        }
        outcome
    }

    /// Clamp a group's member cursors and check drift, without deleting.
    ///
    /// Fails only if the group's own range cannot be read; member failures
    /// are counted in the outcome.
    pub fn repair_group(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        members: &[UserId],
        drift_warn_threshold: u64,
    ) -> StoreResult<EntityOutcome> {
        self.group_cursor_pass(ctx, group, members, drift_warn_threshold)
    }

    pub fn clamp_user(&self, ctx: &RunContext, user: &UserId) -> EntityOutcome {
        let entity = EntityRef::User(user.clone());

        // Only the min reads as zero when missing; a lost max skips the user.
        let bounds = self
            .store
            .get_user_min_seq(ctx, user)
            .or_zero()
            .and_then(|min| Ok((min, self.store.get_user_max_seq(ctx, user)?)));
        let (min, max) = match bounds {
            Ok(bounds) => bounds,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::sweeper",
                    stage = "fetch_cursor",
                    correlation_id = ctx.run_id(),
                    user_id = %user,
                    error = %error,
                    "get user min/max seq failed"
                );
                return EntityOutcome::failed(entity, error);
            }
        };

        let mut outcome = EntityOutcome::new(entity);
        match clamp_user_cursor(self.store, ctx, user, min, max) {
            Ok(warning) => outcome.warnings.extend(warning),
            Err(error) => outcome.error = Some(error.to_string()),
        }
        outcome
    }

    pub fn clamp_group(&self, ctx: &RunContext, group: &GroupId) -> EntityOutcome {
        let entity = EntityRef::Group(group.clone());

        // A missing group max is not read as zero here: that would drag
        // every member cursor down to zero.
        let max = match self.store.get_group_max_seq(ctx, group) {
            Ok(max) => max,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::sweeper",
                    stage = "fetch_max",
                    correlation_id = ctx.run_id(),
                    group_id = %group,
                    error = %error,
                    "get group max seq failed, group skipped"
                );
                return EntityOutcome::failed(entity, error);
            }
        };

        let members = match self.enumerator.list_group_member_ids(ctx, group) {
            Ok(members) => members,
            Err(error) => {
                tracing::error!(
                    target: "seqwarden::sweeper",
                    stage = "list_members",
                    correlation_id = ctx.run_id(),
                    group_id = %group,
                    error = %error,
                    "list group members failed, group skipped"
                );
                return EntityOutcome::failed(entity, error);
            }
        };

        let mut outcome = EntityOutcome::new(entity);
        self.clamp_members(ctx, group, &members, max, &mut outcome);
        outcome
    }

    // --- Internals ---

    fn group_cursor_pass(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        members: &[UserId],
        drift_warn_threshold: u64,
    ) -> StoreResult<EntityOutcome> {
        let range = self
            .store
            .get_group_seq_range(ctx, group)
            .or_zero()
            .map_err(|error| {
                tracing::error!(
                    target: "seqwarden::sweeper",
                    stage = "fetch_range",
                    correlation_id = ctx.run_id(),
                    group_id = %group,
                    error = %error,
                    "get group seq range failed"
                );
                error
            })?;

        let mut outcome = EntityOutcome::new(EntityRef::Group(group.clone()));
        let cache_max = require_cache_max(ctx, &outcome.entity, range.cache_max)?;
        // Clamp target is the cache max, not the durable max.
        self.clamp_members(ctx, group, members, cache_max, &mut outcome);
        outcome.warnings.extend(check_drift(
            ctx,
            &outcome.entity,
            cache_max,
            range.durable_max,
            drift_warn_threshold,
        ));

        tracing::debug!(
            target: "seqwarden::sweeper",
            stage = "complete",
            correlation_id = ctx.run_id(),
            group_id = %group,
            members = members.len(),
            member_failures = outcome.member_failures,
            cache_max_seq = cache_max.0,
            "group cursors repaired"
        );
        Ok(outcome)
    }

    fn clamp_members(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        members: &[UserId],
        group_max: Seq,
        outcome: &mut EntityOutcome,
    ) {
        for user in members {
            let result = self
                .store
                .get_group_member_min_seq(ctx, group, user)
                .or_zero()
                .and_then(|min| clamp_member_cursor(self.store, ctx, group, user, min, group_max));
            match result {
                Ok(warning) => outcome.warnings.extend(warning),
                Err(error) => {
                    outcome.member_failures += 1;
                    tracing::error!(
                        target: "seqwarden::sweeper",
                        stage = "member_cursor",
                        correlation_id = ctx.run_id(),
                        group_id = %group,
                        user_id = %user,
                        max_seq = group_max.0,
                        error = %error,
                        "group member cursor repair failed"
                    );
                }
            }
        }
    }

    fn run_stage<T, F>(&self, ctx: &RunContext, stage: Stage, ids: Vec<T>, job: F) -> StageReport
    where
        T: Send,
        F: Fn(T) -> EntityOutcome + Sync,
    {
        tracing::info!(
            target: "seqwarden::sweeper",
            stage = %stage,
            correlation_id = ctx.run_id(),
            entities = ids.len(),
            workers = self.pool.workers(),
            "sweep stage started"
        );

        let outcome = self.pool.run(ids, ctx.cancel_token(), |id| {
            let outcome = job(id);
            self.publish(ctx, &outcome);
            outcome
        });

        let mut report = StageReport::default();
        for entity in outcome.results {
            report.absorb(entity);
        }
        report.not_started = outcome.not_started;

        if report.not_started > 0 {
            tracing::warn!(
                target: "seqwarden::sweeper",
                stage = %stage,
                correlation_id = ctx.run_id(),
                not_started = report.not_started,
                "sweep stage cancelled before finishing"
            );
        }
        tracing::info!(
            target: "seqwarden::sweeper",
            stage = %stage,
            correlation_id = ctx.run_id(),
            attempted = report.attempted,
            failed = report.failed,
            clamps = report.clamp_count(),
            drift_warnings = report.drift_count(),
            "sweep stage finished"
        );
        report
    }

    /// Publish an entity's warnings and failure, if any.
    pub(crate) fn publish(&self, ctx: &RunContext, outcome: &EntityOutcome) {
        for warning in &outcome.warnings {
            self.events.publish(RepairEvent::Warning {
                run_id: ctx.run_id().to_string(),
                warning: warning.clone(),
            });
        }
        if let Some(reason) = &outcome.error {
            self.events.publish(RepairEvent::EntityFailed {
                run_id: ctx.run_id().to_string(),
                entity: outcome.entity.clone(),
                reason: reason.clone(),
            });
        }
    }
}

/// The cache max-seq a clamp may target. A lost key fails the entity.
fn require_cache_max(
    ctx: &RunContext,
    entity: &EntityRef,
    max: Option<Seq>,
) -> StoreResult<Seq> {
    max.ok_or_else(|| {
        tracing::error!(
            target: "seqwarden::sweeper",
            stage = "fetch_range",
            correlation_id = ctx.run_id(),
            entity = %entity,
            "cache max seq missing, cursors left untouched"
        );
        StoreError::not_found(format!("cache max seq of {entity}"))
    })
}
