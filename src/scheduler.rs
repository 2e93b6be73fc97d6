//! Background trigger for the periodic retention run.

use crate::engine::RepairEngine;
use crate::error::{RepairError, Result};
use crate::tiers::{PopulationEnumerator, SequenceStore};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs [`RepairEngine::scheduled_retention_run`] on a fixed interval.
pub struct RetentionScheduler;

impl RetentionScheduler {
    /// Start ticking at the engine's configured interval.
    pub fn start<S, P>(engine: Arc<RepairEngine<S, P>>) -> Result<SchedulerHandle>
    where
        S: SequenceStore + ?Sized + 'static,
        P: PopulationEnumerator + ?Sized + 'static,
    {
        let interval = engine.config().schedule_interval();
        Self::start_with_interval(engine, interval)
    }

    /// Start ticking at `interval`. The first run happens one interval
    /// after start.
    ///
    /// Fails with [`RepairError::SchedulerDisabled`] when the engine's
    /// config turns scheduled retention off.
    pub fn start_with_interval<S, P>(
        engine: Arc<RepairEngine<S, P>>,
        interval: Duration,
    ) -> Result<SchedulerHandle>
    where
        S: SequenceStore + ?Sized + 'static,
        P: PopulationEnumerator + ?Sized + 'static,
    {
        if !engine.config().scheduled_enabled {
            tracing::warn!(
                target: "seqwarden::scheduler",
                "scheduled retention disabled, scheduler not started"
            );
            return Err(RepairError::SchedulerDisabled);
        }
        if interval.is_zero() {
            return Err(RepairError::InvalidConfig(
                "schedule interval must be non-zero".into(),
            ));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let runs = Arc::new(AtomicU64::new(0));
        let thread_runs = Arc::clone(&runs);

        let thread = thread::Builder::new()
            .name("seqwarden-retention".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let report = engine.scheduled_retention_run();
                            thread_runs.fetch_add(1, Ordering::SeqCst);
                            tracing::debug!(
                                target: "seqwarden::scheduler",
                                correlation_id = report.run_id.as_str(),
                                "scheduled run complete"
                            );
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })?;

        tracing::info!(
            target: "seqwarden::scheduler",
            interval_secs = interval.as_secs_f64(),
            "retention scheduler started"
        );

        Ok(SchedulerHandle {
            stop_tx,
            thread: Some(thread),
            runs,
        })
    }
}

/// Owner of a running scheduler. Dropping it stops the scheduler.
pub struct SchedulerHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    runs: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Scheduled runs finished so far.
    pub fn runs_completed(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Stop ticking and wait for an in-progress run to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(());
        if thread.join().is_err() {
            tracing::error!(
                target: "seqwarden::scheduler",
                "retention scheduler thread panicked"
            );
        }
        tracing::info!(target: "seqwarden::scheduler", "retention scheduler stopped");
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
