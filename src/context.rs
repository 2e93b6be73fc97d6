//! Per-invocation run context and cancellation.

use crate::types::Timestamp;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which entry point started a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunMode {
    ScheduledRetention,
    OnDemandGroupRepair,
    FullSweep,
    /// Read-only inspection of one entity.
    Inspection,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::ScheduledRetention => "scheduled_retention",
            RunMode::OnDemandGroupRepair => "on_demand_group_repair",
            RunMode::FullSweep => "full_sweep",
            RunMode::Inspection => "inspection",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one engine invocation.
///
/// Threaded by reference through every store call and attached to every
/// log line as `correlation_id`.
#[derive(Clone, Debug)]
pub struct RunContext {
    run_id: String,
    mode: RunMode,
    started: Timestamp,
    cancel: CancelToken,
}

impl RunContext {
    /// Build a context for the `invocation`-th run of an engine.
    pub fn new(mode: RunMode, invocation: u64, cancel: CancelToken) -> Self {
        let started = Timestamp::now();
        Self {
            run_id: derive_run_id(mode, started, invocation),
            mode,
            started,
            cancel,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn started(&self) -> Timestamp {
        self.started
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn derive_run_id(mode: RunMode, started: Timestamp, invocation: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mode.as_str().as_bytes());
    hasher.update(started.0.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(invocation.to_le_bytes());
    let digest = hasher.finalize();
    format!("{}-{}", mode.as_str(), hex::encode(&digest[..6]))
}

/// Cooperative stop signal for a sweep.
///
/// Checked before each entity starts; an entity already in flight always
/// finishes its delete and clamp.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Same flag, with a deadline of `timeout` from now unless one is already set.
    pub fn child_with_timeout(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(existing), _) => Some(existing),
            (None, Some(t)) => Instant::now().checked_add(t),
            (None, None) => None,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}
