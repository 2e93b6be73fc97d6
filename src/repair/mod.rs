//! Repair primitives applied per entity.
//!
//! - [`clamp`]: enforce `min <= max` on one cursor
//! - [`drift`]: surface divergence between cache and durable max-seq
//!
//! Both produce [`ConsistencyWarning`]s. Warnings are observability only and
//! never stop a sweep.

pub mod clamp;
pub mod drift;

pub use clamp::{clamp, clamp_member_cursor, clamp_user_cursor};
pub use drift::{check_drift, drift_exceeds};

use crate::types::{GroupId, Seq, UserId};
use serde::Serialize;
use std::fmt;

/// Entity a sweep step operates on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::User(id) => write!(f, "user:{id}"),
            EntityRef::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// A min-seq cursor that can be clamped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorRef {
    /// A user's cache-tier cursor.
    User { user_id: UserId },
    /// One recipient's cursor inside a group.
    Member { group_id: GroupId, user_id: UserId },
}

impl fmt::Display for CursorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorRef::User { user_id } => write!(f, "user:{user_id}"),
            CursorRef::Member { group_id, user_id } => write!(f, "member:{group_id}/{user_id}"),
        }
    }
}

/// Non-fatal signal that sequence state needed repair or looks wrong.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    /// A cursor was above its bound and was lowered to it.
    Clamp {
        cursor: CursorRef,
        original_min: Seq,
        original_max: Seq,
    },
    /// Cache and durable max-seq diverge beyond the threshold.
    Drift {
        entity: EntityRef,
        cache_max: Seq,
        durable_max: Seq,
    },
}

impl ConsistencyWarning {
    pub fn is_clamp(&self) -> bool {
        matches!(self, ConsistencyWarning::Clamp { .. })
    }

    pub fn is_drift(&self) -> bool {
        matches!(self, ConsistencyWarning::Drift { .. })
    }
}
