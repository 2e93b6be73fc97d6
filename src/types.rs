//! Core types for sequence state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of a user.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a group conversation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        GroupId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a message in one conversation's ordered log.
///
/// Assigned upstream by ingestion; `Seq(0)` means "nothing recorded".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Seq(pub u64);

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Seq {
    pub fn next(self) -> Self {
        Seq(self.0.saturating_add(1))
    }

    /// Absolute distance between two sequence numbers.
    pub fn abs_diff(self, other: Seq) -> u64 {
        self.0.abs_diff(other.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock before the epoch reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// This timestamp moved back by `by`, saturating at the epoch.
    pub fn saturating_sub(self, by: Duration) -> Self {
        let micros = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_sub(micros).max(0))
    }

    /// Oldest timestamp still inside a retention window ending now.
    pub fn retention_cutoff(window: Duration) -> Self {
        Timestamp::now().saturating_sub(window)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Fan-out model of a group conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffusionKind {
    /// One physically distinct copy of every message per recipient.
    WriteDiffusion,
    /// One shared copy; per-recipient retention tracked by cursor.
    ReadDiffusion,
}

impl DiffusionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffusionKind::WriteDiffusion => "write_diffusion",
            DiffusionKind::ReadDiffusion => "read_diffusion",
        }
    }
}

impl Default for DiffusionKind {
    fn default() -> Self {
        DiffusionKind::ReadDiffusion
    }
}

impl fmt::Display for DiffusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequence range of one user as seen by both tiers.
///
/// `cache_max` is `None` when the cache tier has lost the key. A missing
/// max is never a clamp target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserSeqRange {
    pub durable_max: Seq,
    pub cache_min: Seq,
    pub cache_max: Option<Seq>,
}

/// Sequence range of one group as seen by both tiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupSeqRange {
    pub durable_min: Seq,
    pub durable_max: Seq,
    pub cache_max: Option<Seq>,
}

/// Full sequence state of a user. A cache key the tier has lost reads as 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserSeqRecord {
    pub user_id: UserId,
    pub cache_min_seq: Seq,
    pub cache_max_seq: Seq,
    pub durable_max_seq: Seq,
}

impl UserSeqRecord {
    pub fn from_range(user_id: UserId, range: UserSeqRange) -> Self {
        Self {
            user_id,
            cache_min_seq: range.cache_min,
            cache_max_seq: range.cache_max.unwrap_or_default(),
            durable_max_seq: range.durable_max,
        }
    }

    /// Whether the cache cursor satisfies `min <= max`.
    pub fn is_consistent(&self) -> bool {
        self.cache_min_seq <= self.cache_max_seq
    }
}

/// Full sequence state of a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupSeqRecord {
    pub group_id: GroupId,
    pub diffusion_kind: DiffusionKind,
    pub cache_max_seq: Seq,
    pub durable_max_seq: Seq,
}

/// Per-recipient low-water mark inside a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberCursor {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub min_seq: Seq,
}
