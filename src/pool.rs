//! Bounded worker pool for per-entity sweeps.

use crate::context::CancelToken;
use crossbeam_channel::{bounded, unbounded};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Results of running a job over a population.
#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// One result per entity that started, in completion order.
    pub results: Vec<R>,
    /// Entities never started because the token tripped.
    pub not_started: usize,
}

/// Runs a per-entity job on up to `workers` threads.
///
/// Entities are independent, so no ordering is kept between them. The
/// cancel token is checked before each entity starts; a started entity
/// always runs to completion.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run<T, R, F>(&self, items: Vec<T>, cancel: &CancelToken, job: F) -> PoolOutcome<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        if self.workers == 1 || items.len() <= 1 {
            return Self::run_inline(items, cancel, job);
        }

        let total = items.len();
        let started = AtomicUsize::new(0);
        let (work_tx, work_rx) = bounded::<T>(self.workers * 2);
        let (result_tx, result_rx) = unbounded::<R>();

        thread::scope(|scope| {
            for _ in 0..self.workers.min(total) {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let job = &job;
                let started = &started;
                scope.spawn(move || {
                    for item in work_rx.iter() {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        started.fetch_add(1, Ordering::SeqCst);
                        if result_tx.send(job(item)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for item in items {
                if cancel.is_cancelled() || work_tx.send(item).is_err() {
                    break;
                }
            }
            drop(work_tx);
        });

        let results: Vec<R> = result_rx.try_iter().collect();
        PoolOutcome {
            not_started: total - started.load(Ordering::SeqCst),
            results,
        }
    }

    fn run_inline<T, R, F>(items: Vec<T>, cancel: &CancelToken, job: F) -> PoolOutcome<R>
    where
        F: Fn(T) -> R,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            results.push(job(item));
        }
        PoolOutcome {
            not_started: total - results.len(),
            results,
        }
    }
}
