//! Deterministic in-memory [`Backend`] for exercising the scheduler
//! without a real job-execution system.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use workflow_core::{Backend, BackendJobId, JobStatus, ScheduledChild};

struct RunningJob {
    cmd_key: String,
    ticks_left: u32,
    outcome: String,
}

#[derive(Default)]
struct State {
    next_id: u64,
    outcomes: HashMap<String, String>,
    ticks: HashMap<String, u32>,
    declines: HashSet<String>,
    running: HashMap<String, RunningJob>,
    cmds: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<ScheduledChild>>,
}

/// Each configuration is keyed by `cmd.join(" ")`, the exact command line
/// a task assembles -- give tasks under test distinct commands so their
/// outcomes can be configured independently.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outcome string `status` reports once this command finishes.
    /// Defaults to `"finished"` if never configured.
    pub fn with_outcome(&self, cmd_key: impl Into<String>, outcome: impl Into<String>) -> &Self {
        self.state.lock().unwrap().outcomes.insert(cmd_key.into(), outcome.into());
        self
    }

    /// Number of `status` polls that report `StillRunning` before the job
    /// finishes.
    pub fn with_ticks(&self, cmd_key: impl Into<String>, ticks: u32) -> &Self {
        self.state.lock().unwrap().ticks.insert(cmd_key.into(), ticks);
        self
    }

    /// The next `schedule` call for this command returns `None` instead
    /// of submitting, simulating a backend that declines to run it yet.
    pub fn decline_once(&self, cmd_key: impl Into<String>) -> &Self {
        self.state.lock().unwrap().declines.insert(cmd_key.into());
        self
    }

    /// Pre-register children reported by `lookup_scheduled_children` for
    /// a given parent job id, for resume-protocol tests.
    pub fn with_scheduled_children(&self, parent_job_id: impl Into<String>, children: Vec<ScheduledChild>) -> &Self {
        self.state.lock().unwrap().children.insert(parent_job_id.into(), children);
        self
    }

    /// Pre-register the recorded argv for a job id, for resume-protocol
    /// tests that parse `--starting-job` out of a prior run's command.
    pub fn with_job_cmd(&self, job_id: impl Into<String>, cmd: Vec<String>) -> &Self {
        self.state.lock().unwrap().cmds.insert(job_id.into(), cmd);
        self
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().unwrap().running.len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn schedule(
        &self,
        cmd: &[String],
        _tags: &[String],
        _units: Option<&str>,
        _project_id: Option<&str>,
    ) -> anyhow::Result<Option<BackendJobId>> {
        let key = cmd.join(" ");
        let mut st = self.state.lock().unwrap();
        if st.declines.remove(&key) {
            return Ok(None);
        }
        st.next_id += 1;
        let id = format!("job-{}", st.next_id);
        let ticks = st.ticks.get(&key).copied().unwrap_or(0);
        let outcome = st.outcomes.get(&key).cloned().unwrap_or_else(|| "finished".to_string());
        st.cmds.insert(id.clone(), cmd.to_vec());
        st.running.insert(
            id.clone(),
            RunningJob {
                cmd_key: key,
                ticks_left: ticks,
                outcome,
            },
        );
        Ok(Some(BackendJobId(id)))
    }

    async fn status(&self, job_id: &BackendJobId) -> anyhow::Result<JobStatus> {
        let mut st = self.state.lock().unwrap();
        let job = st
            .running
            .get_mut(&job_id.0)
            .ok_or_else(|| anyhow::anyhow!("unknown job {job_id}"))?;
        if job.ticks_left > 0 {
            job.ticks_left -= 1;
            return Ok(JobStatus::StillRunning);
        }
        let outcome = job.outcome.clone();
        let _ = &job.cmd_key;
        st.running.remove(&job_id.0);
        Ok(JobStatus::Finished(outcome))
    }

    async fn lookup_scheduled_children(&self, parent_job_id: &BackendJobId) -> anyhow::Result<Vec<ScheduledChild>> {
        Ok(self.state.lock().unwrap().children.get(&parent_job_id.0).cloned().unwrap_or_default())
    }

    async fn job_cmd(&self, job_id: &BackendJobId) -> anyhow::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().cmds.get(&job_id.0).cloned().unwrap_or_default())
    }
}
