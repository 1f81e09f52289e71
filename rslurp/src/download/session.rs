//! Session tallies and the final report.
//!
//! A [`Session`] is created by the orchestrator once the job set is known
//! and shared with every worker. Workers record outcomes; the orchestrator
//! turns the tallies into a [`SessionReport`] at teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Exit status for a run where every job succeeded.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit status when at least one job failed.
pub const EXIT_FAILURE: u8 = 1;

/// Exit status when the run was interrupted by a signal.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Shared state of one download session.
#[derive(Debug)]
pub struct Session {
    total: usize,
    workers: usize,
    started: Instant,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Session {
    /// Create a session for `total` jobs run by `workers` workers.
    pub fn new(total: usize, workers: usize) -> Self {
        Self {
            total,
            workers,
            started: Instant::now(),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record a job that finished successfully.
    pub fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a job that failed.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Whether every job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.completed() + self.failed() == self.total
    }

    /// Snapshot the tallies into a report.
    pub fn report(&self, bytes: u64, interrupted: bool) -> SessionReport {
        SessionReport {
            total: self.total,
            completed: self.completed(),
            failed: self.failed(),
            bytes,
            elapsed: self.elapsed(),
            interrupted,
            output_error: None,
        }
    }
}

/// Outcome of a finished (or interrupted) session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Number of jobs planned.
    pub total: usize,
    /// Jobs that completed successfully.
    pub completed: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Bytes received across all workers.
    pub bytes: u64,
    /// Wall time since the session started.
    pub elapsed: Duration,
    /// The session was stopped by an interrupt.
    pub interrupted: bool,
    /// The output could not be finalized after the last job.
    pub output_error: Option<String>,
}

impl SessionReport {
    /// Report for a run with nothing to do.
    pub fn empty() -> Self {
        Self {
            total: 0,
            completed: 0,
            failed: 0,
            bytes: 0,
            elapsed: Duration::ZERO,
            interrupted: false,
            output_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed == 0 && self.output_error.is_none()
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.failed > 0 || self.output_error.is_some() {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }
}
