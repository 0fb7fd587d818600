//! The [`Backend`] trait -- the adapter interface to the external
//! job-execution system.
//!
//! Everything that performs I/O lives behind this trait. It is
//! intentionally out of scope for the orchestration engine (spec.md §1):
//! the scheduler only ever calls through it, never assumes anything about
//! how jobs actually run.
//!
//! The trait is object-safe so it can be stored as `Box<dyn Backend>` /
//! `Arc<dyn Backend>` by the driver loop.

use async_trait::async_trait;

/// Opaque job id returned by the backend on submission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendJobId(pub String);

impl std::fmt::Display for BackendJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BackendJobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BackendJobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Result of polling a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still executing; no outcome yet.
    StillRunning,
    /// Finished, with an opaque outcome string. The scheduler treats this
    /// as a failed outcome only if it is present in the configured
    /// failed-outcome set.
    Finished(String),
}

/// One child job reported by [`Backend::lookup_scheduled_children`]:
/// `(fan-out index or 0, "manager_name/task_id", child_job_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledChild {
    pub index: u32,
    pub name: String,
    pub job_id: BackendJobId,
}

/// Adapter interface to the external job-submission backend.
///
/// Implementors wrap a specific execution system (a batch scheduler, a
/// cloud job API, a local process pool) and translate the scheduler's
/// abstract requests into concrete submissions and status checks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit a command line for execution. `None` means "do not
    /// transition to running" -- the caller leaves the job pending.
    async fn schedule(
        &self,
        cmd: &[String],
        tags: &[String],
        units: Option<&str>,
        project_id: Option<&str>,
    ) -> anyhow::Result<Option<BackendJobId>>;

    /// Poll a submitted job for its outcome.
    async fn status(&self, job_id: &BackendJobId) -> anyhow::Result<JobStatus>;

    /// Enumerate the child jobs a prior manager run scheduled, for the
    /// resume protocol (spec.md §4.8).
    async fn lookup_scheduled_children(
        &self,
        parent_job_id: &BackendJobId,
    ) -> anyhow::Result<Vec<ScheduledChild>>;

    /// The exact argv the backend recorded for `job_id`, used to recover
    /// the original `--starting-job` set when resuming without an
    /// explicit override.
    async fn job_cmd(&self, job_id: &BackendJobId) -> anyhow::Result<Vec<String>>;
}

// Compile-time assertion: Backend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Backend) {}
};
