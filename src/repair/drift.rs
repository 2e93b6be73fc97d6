//! Cache/durable max-seq drift detection.
//!
//! Small divergence is normal while ingestion writes both tiers. Large
//! divergence points at a write-path defect upstream; it is reported, never
//! corrected here.

use super::{ConsistencyWarning, EntityRef};
use crate::context::RunContext;
use crate::types::Seq;

pub fn drift_exceeds(cache_max: Seq, durable_max: Seq, threshold: u64) -> bool {
    durable_max.abs_diff(cache_max) > threshold
}

/// Check one entity and log a warning when its tiers have drifted apart.
pub fn check_drift(
    ctx: &RunContext,
    entity: &EntityRef,
    cache_max: Seq,
    durable_max: Seq,
    threshold: u64,
) -> Option<ConsistencyWarning> {
    if !drift_exceeds(cache_max, durable_max, threshold) {
        return None;
    }

    tracing::warn!(
        target: "seqwarden::repair",
        correlation_id = ctx.run_id(),
        entity = %entity,
        cache_max_seq = cache_max.0,
        durable_max_seq = durable_max.0,
        threshold,
        "cache max seq and durable max seq diverge"
    );

    Some(ConsistencyWarning::Drift {
        entity: entity.clone(),
        cache_max,
        durable_max,
    })
}
