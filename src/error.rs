//! Error types for the repair engine and its store contracts.

use std::fmt;
use thiserror::Error;

/// Storage tier a failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Cache,
    Durable,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Cache => f.write_str("cache"),
            Tier::Durable => f.write_str("durable"),
        }
    }
}

/// Outcome of a failed call against a sequence store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity has no recorded cursor yet. Callers read this as seq 0.
    #[error("No cursor recorded for {entity}")]
    NotFound { entity: String },

    #[error("{tier} tier unavailable: {reason}")]
    Unavailable { tier: Tier, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),
}

impl StoreError {
    pub fn not_found(entity: impl fmt::Display) -> Self {
        StoreError::NotFound {
            entity: entity.to_string(),
        }
    }

    pub fn unavailable(tier: Tier, reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            tier,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Tier the failure came from, when known.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            StoreError::Unavailable { tier, .. } => Some(*tier),
            StoreError::Io(_)
            | StoreError::Serialization(_)
            | StoreError::Deserialization(_)
            | StoreError::InvalidFormat(_) => Some(Tier::Durable),
            StoreError::NotFound { .. } => None,
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store contract calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Reads a `NotFound` outcome as the zero value.
pub trait NotFoundAsZero<T> {
    fn or_zero(self) -> StoreResult<T>;
}

impl<T: Default> NotFoundAsZero<T> for StoreResult<T> {
    fn or_zero(self) -> StoreResult<T> {
        match self {
            Err(e) if e.is_not_found() => Ok(T::default()),
            other => other,
        }
    }
}

/// Population that could not be listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Population {
    Users,
    Groups,
    GroupMembers,
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Population::Users => f.write_str("users"),
            Population::Groups => f.write_str("groups"),
            Population::GroupMembers => f.write_str("group members"),
        }
    }
}

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to enumerate {population}: {reason}")]
    Enumeration {
        population: Population,
        reason: String,
    },

    #[error("Run {run_id} cancelled")]
    Cancelled { run_id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Scheduled retention is disabled")]
    SchedulerDisabled,

    #[error("Config parse error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepairError {
    pub fn enumeration(population: Population, reason: impl fmt::Display) -> Self {
        RepairError::Enumeration {
            population,
            reason: reason.to_string(),
        }
    }

    pub fn is_enumeration(&self) -> bool {
        matches!(self, RepairError::Enumeration { .. })
    }
}

impl From<serde_json::Error> for RepairError {
    fn from(e: serde_json::Error) -> Self {
        RepairError::Json(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RepairError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Seq;

    #[test]
    fn test_not_found_reads_as_zero() {
        let missing: StoreResult<Seq> = Err(StoreError::not_found("user:u1"));
        assert_eq!(missing.or_zero().unwrap(), Seq(0));

        let present: StoreResult<Seq> = Ok(Seq(7));
        assert_eq!(present.or_zero().unwrap(), Seq(7));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let failed: StoreResult<Seq> = Err(StoreError::unavailable(Tier::Cache, "timeout"));
        let err = failed.or_zero().unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(err.tier(), Some(Tier::Cache));
    }

    #[test]
    fn test_enumeration_error_display() {
        let err = RepairError::enumeration(Population::Users, "connection refused");
        assert!(err.is_enumeration());
        assert_eq!(
            err.to_string(),
            "Failed to enumerate users: connection refused"
        );
    }
}
