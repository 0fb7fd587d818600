//! Scheduler tunables (spec.md §6 CLI surface, minus the CLI itself).

use std::collections::BTreeSet;

/// Outcome strings classified as "failed" by default, before any
/// `--failed-outcomes` additions.
pub const DEFAULT_FAILED_OUTCOMES: &[&str] = &[
    "failed",
    "killed by oom",
    "cancelled",
    "cancel_timeout",
    "memusage_exceeded",
    "cancelled (stalled)",
];

/// Tunables that govern one `Scheduler` run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Outcome strings routed through `on_finish`'s `"failed"` entry.
    pub failed_outcomes: BTreeSet<String>,
    /// Cap on concurrently running jobs. `None` means unbounded.
    pub max_running_jobs: Option<usize>,
    /// Disables all `on_finish` routing; only the starting jobs run.
    pub only_starting_jobs: bool,
    /// Fan-out multiplicity applied to every task with a `parallel_arg`.
    pub parallelization: u32,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra_failed_outcomes(mut self, outcomes: impl IntoIterator<Item = String>) -> Self {
        self.failed_outcomes.extend(outcomes);
        self
    }

    pub fn with_max_running_jobs(mut self, max: Option<usize>) -> Self {
        self.max_running_jobs = max;
        self
    }

    pub fn with_only_starting_jobs(mut self, only: bool) -> Self {
        self.only_starting_jobs = only;
        self
    }

    pub fn with_parallelization(mut self, n: u32) -> Self {
        self.parallelization = n.max(1);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failed_outcomes: DEFAULT_FAILED_OUTCOMES.iter().map(|s| s.to_string()).collect(),
            max_running_jobs: None,
            only_starting_jobs: false,
            parallelization: 1,
        }
    }
}
