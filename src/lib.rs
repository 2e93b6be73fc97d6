//! # seqwarden
//!
//! Retention and sequence-consistency repair for a two-tier message store.
//!
//! Every conversation has an ordered log addressed by sequence numbers. A
//! fast, lossy cache tier tracks each conversation's min-seq and max-seq; a
//! durable tier holds the messages themselves. The engine periodically
//! deletes messages older than the retention window, advances min-seq past
//! them, and repairs cursors that drifted into an invalid state.
//!
//! ## Core Concepts
//!
//! - **Clamp**: any cursor with `min > max` is lowered to `max`
//! - **Drift**: cache and durable max-seq diverging beyond a threshold is
//!   reported, never corrected
//! - **Run modes**: scheduled retention, single-group repair, full sweep
//! - **Run context**: every run carries a generated ID into every store call
//!   and log line
//!
//! ## Example
//!
//! ```ignore
//! use seqwarden::{EngineConfig, MemoryStore, RepairEngine, RetentionScheduler};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = Arc::new(RepairEngine::from_shared(
//!     store,
//!     EngineConfig::from_file("seqwarden.json")?,
//! )?);
//!
//! // One-off emergency repair
//! let report = engine.full_sweep_repair()?;
//! println!("{} cursors clamped", report.clamp_count());
//!
//! // Periodic retention in the background
//! let scheduler = RetentionScheduler::start(Arc::clone(&engine))?;
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod pool;
pub mod repair;
pub mod report;
pub mod scheduler;
pub mod sweeper;
pub mod tiers;
pub mod types;

// Re-exports
pub use config::{EngineConfig, RetentionPolicy};
pub use context::{CancelToken, RunContext, RunMode};
pub use engine::RepairEngine;
pub use error::{NotFoundAsZero, Population, RepairError, Result, StoreError, StoreResult, Tier};
pub use events::{
    DropReason, EventBus, EventFilter, RepairEvent, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};
pub use pool::{PoolOutcome, WorkerPool};
pub use repair::{ConsistencyWarning, CursorRef, EntityRef};
pub use report::{EntityOutcome, RunReport, RunSummary, SkippedStage, Stage, StageReport};
pub use scheduler::{RetentionScheduler, SchedulerHandle};
pub use sweeper::RetentionSweeper;
pub use tiers::{CacheKey, MemoryStore, PopulationEnumerator, SequenceStore, StoreSnapshot};
pub use types::*;
