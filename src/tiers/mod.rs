//! Contracts the engine consumes from the storage tiers.
//!
//! The engine never assigns sequence numbers and never writes message
//! bodies. It reads sequence state, deletes expired history, and moves
//! min-seq cursors. Everything else belongs to the ingestion pipeline.
//!
//! A [`StoreError::NotFound`](crate::StoreError::NotFound) result for a
//! min-seq cursor means "no cursor recorded yet" and is read as seq 0 (see
//! [`NotFoundAsZero`](crate::error::NotFoundAsZero)). A missing cache
//! max-seq is different: range reads report it as `None` and the entity is
//! left untouched.

mod memory;

pub use memory::{CacheKey, MemoryStore, StoreSnapshot, DEFAULT_CACHE_CAPACITY};

use crate::context::RunContext;
use crate::error::StoreResult;
use crate::types::{DiffusionKind, GroupId, GroupSeqRange, Seq, UserId, UserSeqRange};
use std::time::Duration;

/// Sequence state across the cache and durable tiers.
///
/// Implementations handle their own retry and backoff. Every call receives
/// the run context so the implementation can tag its own logs and requests.
pub trait SequenceStore: Send + Sync {
    /// Delete a user's messages older than `now - window` from the durable
    /// tier and move the cache min-seq to the first surviving seq.
    ///
    /// A no-op when nothing is expired.
    fn delete_expired_and_advance_min_seq(
        &self,
        ctx: &RunContext,
        user: &UserId,
        window: Duration,
    ) -> StoreResult<()>;

    /// Group counterpart of [`delete_expired_and_advance_min_seq`].
    ///
    /// Whether members hold physical copies or share one log is up to the
    /// store.
    ///
    /// [`delete_expired_and_advance_min_seq`]: SequenceStore::delete_expired_and_advance_min_seq
    fn delete_expired_group_msgs_and_advance_min_seq(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        members: &[UserId],
        window: Duration,
    ) -> StoreResult<()>;

    fn get_user_seq_range(&self, ctx: &RunContext, user: &UserId) -> StoreResult<UserSeqRange>;

    fn get_group_seq_range(&self, ctx: &RunContext, group: &GroupId) -> StoreResult<GroupSeqRange>;

    /// Cache-tier max-seq of a group.
    fn get_group_max_seq(&self, ctx: &RunContext, group: &GroupId) -> StoreResult<Seq>;

    fn get_group_member_min_seq(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        user: &UserId,
    ) -> StoreResult<Seq>;

    fn set_group_member_min_seq(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        user: &UserId,
        seq: Seq,
    ) -> StoreResult<()>;

    fn get_user_min_seq(&self, ctx: &RunContext, user: &UserId) -> StoreResult<Seq>;

    fn get_user_max_seq(&self, ctx: &RunContext, user: &UserId) -> StoreResult<Seq>;

    fn set_user_min_seq(&self, ctx: &RunContext, user: &UserId, seq: Seq) -> StoreResult<()>;
}

/// Lists the populations a sweep walks.
pub trait PopulationEnumerator: Send + Sync {
    fn list_all_user_ids(&self, ctx: &RunContext) -> StoreResult<Vec<UserId>>;

    fn list_group_ids_by_kind(
        &self,
        ctx: &RunContext,
        kind: DiffusionKind,
    ) -> StoreResult<Vec<GroupId>>;

    fn list_group_member_ids(&self, ctx: &RunContext, group: &GroupId) -> StoreResult<Vec<UserId>>;

    fn group_diffusion_kind(&self, ctx: &RunContext, group: &GroupId)
        -> StoreResult<DiffusionKind>;
}
