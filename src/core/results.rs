//! Run outcome counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters of logical operation outcomes.
///
/// Workers only ever increment; the totals are read once, through
/// [`ResultAggregator::snapshot`], after the pool has shut down.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    succeeded: AtomicU64,
    failed: AtomicU64,
    warned: AtomicU64,
}

impl ResultAggregator {
    /// Create a zeroed aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation skipped with a warning
    pub fn record_warning(&self) {
        self.warned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RunResult {
        RunResult {
            tasks_succeeded: self.succeeded.load(Ordering::SeqCst),
            tasks_failed: self.failed.load(Ordering::SeqCst),
            tasks_warned: self.warned.load(Ordering::SeqCst),
        }
    }
}

/// Final run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Operations that completed
    pub tasks_succeeded: u64,
    /// Operations that failed
    pub tasks_failed: u64,
    /// Operations skipped with a warning
    pub tasks_warned: u64,
}

impl RunResult {
    /// Check if no operation failed
    pub fn is_success(&self) -> bool {
        self.tasks_failed == 0
    }

    /// Process exit code matching the outcome: 1 on failure, 2 on warnings only
    pub fn exit_code(&self) -> i32 {
        if self.tasks_failed > 0 {
            1
        } else if self.tasks_warned > 0 {
            2
        } else {
            0
        }
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Transfer Summary ===");
        println!("Succeeded:  {}", self.tasks_succeeded);
        println!("Warned:     {}", self.tasks_warned);
        println!("Failed:     {}", self.tasks_failed);
    }
}

impl std::ops::AddAssign for RunResult {
    fn add_assign(&mut self, other: Self) {
        self.tasks_succeeded += other.tasks_succeeded;
        self.tasks_failed += other.tasks_failed;
        self.tasks_warned += other.tasks_warned;
    }
}
