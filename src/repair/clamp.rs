//! Cursor clamping.

use super::{ConsistencyWarning, CursorRef};
use crate::context::RunContext;
use crate::error::StoreResult;
use crate::tiers::SequenceStore;
use crate::types::{GroupId, Seq, UserId};

/// Returns the repaired min when `min > max`, otherwise `None`.
pub fn clamp(min: Seq, max: Seq) -> Option<Seq> {
    if min > max {
        Some(max)
    } else {
        None
    }
}

/// Clamp a user's cache cursor, writing the repaired value back.
pub fn clamp_user_cursor<S: SequenceStore + ?Sized>(
    store: &S,
    ctx: &RunContext,
    user: &UserId,
    min: Seq,
    max: Seq,
) -> StoreResult<Option<ConsistencyWarning>> {
    let Some(repaired) = clamp(min, max) else {
        return Ok(None);
    };

    if let Err(error) = store.set_user_min_seq(ctx, user, repaired) {
        tracing::error!(
            target: "seqwarden::repair",
            correlation_id = ctx.run_id(),
            user_id = %user,
            min_seq = min.0,
            max_seq = max.0,
            error = %error,
            "set user min seq failed"
        );
        return Err(error);
    }

    tracing::warn!(
        target: "seqwarden::repair",
        correlation_id = ctx.run_id(),
        user_id = %user,
        min_seq = min.0,
        max_seq = max.0,
        "user min seq clamped to max seq"
    );

    Ok(Some(ConsistencyWarning::Clamp {
        cursor: CursorRef::User {
            user_id: user.clone(),
        },
        original_min: min,
        original_max: max,
    }))
}

/// Clamp one member's cursor against the group's cache max-seq.
pub fn clamp_member_cursor<S: SequenceStore + ?Sized>(
    store: &S,
    ctx: &RunContext,
    group: &GroupId,
    user: &UserId,
    min: Seq,
    group_cache_max: Seq,
) -> StoreResult<Option<ConsistencyWarning>> {
    let Some(repaired) = clamp(min, group_cache_max) else {
        return Ok(None);
    };

    if let Err(error) = store.set_group_member_min_seq(ctx, group, user, repaired) {
        tracing::error!(
            target: "seqwarden::repair",
            correlation_id = ctx.run_id(),
            group_id = %group,
            user_id = %user,
            min_seq = min.0,
            max_seq = group_cache_max.0,
            error = %error,
            "set group member min seq failed"
        );
        return Err(error);
    }

    tracing::warn!(
        target: "seqwarden::repair",
        correlation_id = ctx.run_id(),
        group_id = %group,
        user_id = %user,
        min_seq = min.0,
        max_seq = group_cache_max.0,
        "group member min seq clamped to group max seq"
    );

    Ok(Some(ConsistencyWarning::Clamp {
        cursor: CursorRef::Member {
            group_id: group.clone(),
            user_id: user.clone(),
        },
        original_min: min,
        original_max: group_cache_max,
    }))
}
