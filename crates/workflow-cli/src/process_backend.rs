//! A [`Backend`] that runs jobs as local subprocesses.
//!
//! This is the reference adapter for driving the scheduler end to end;
//! production deployments are expected to swap in a backend for whatever
//! job-execution system they actually run against (spec.md §1 treats the
//! backend as an external collaborator). History here lives only in this
//! process's memory, so `lookup_scheduled_children` only ever reports
//! children scheduled by the current run -- there is no cross-invocation
//! resume for this particular adapter, only for ones backed by a real job
//! history store.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use workflow_core::{Backend, BackendJobId, JobStatus, ScheduledChild};

struct State {
    next_id: u64,
    children: HashMap<String, Child>,
    cmds: HashMap<String, Vec<String>>,
    scheduled: Vec<ScheduledChild>,
}

pub struct ProcessBackend {
    manager_name: String,
    state: Mutex<State>,
}

impl ProcessBackend {
    pub fn new(manager_name: impl Into<String>) -> Self {
        Self {
            manager_name: manager_name.into(),
            state: Mutex::new(State {
                next_id: 0,
                children: HashMap::new(),
                cmds: HashMap::new(),
                scheduled: Vec::new(),
            }),
        }
    }

    /// The synthetic job id this run's own manager process is known by,
    /// for `lookup_scheduled_children` to key off of.
    pub fn manager_job_id(&self) -> BackendJobId {
        BackendJobId(format!("{}-run", self.manager_name))
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    async fn schedule(
        &self,
        cmd: &[String],
        tags: &[String],
        _units: Option<&str>,
        _project_id: Option<&str>,
    ) -> anyhow::Result<Option<BackendJobId>> {
        let Some((program, args)) = cmd.split_first() else {
            anyhow::bail!("empty command line");
        };
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let job_id = format!("job-{}", st.next_id);
        let task_hint = tags.first().cloned().unwrap_or_else(|| program.clone());
        let index = st.scheduled.len() as u32;
        st.scheduled.push(ScheduledChild {
            index,
            name: format!("{}/{task_hint}", self.manager_name),
            job_id: BackendJobId(job_id.clone()),
        });
        st.cmds.insert(job_id.clone(), cmd.to_vec());
        st.children.insert(job_id.clone(), child);
        Ok(Some(BackendJobId(job_id)))
    }

    async fn status(&self, job_id: &BackendJobId) -> anyhow::Result<JobStatus> {
        let mut st = self.state.lock().unwrap();
        let Some(child) = st.children.get_mut(&job_id.0) else {
            anyhow::bail!("unknown job {job_id}");
        };
        match child.try_wait()? {
            None => Ok(JobStatus::StillRunning),
            Some(exit_status) => {
                let outcome = if exit_status.success() { "finished" } else { "failed" };
                st.children.remove(&job_id.0);
                Ok(JobStatus::Finished(outcome.to_string()))
            }
        }
    }

    async fn lookup_scheduled_children(&self, parent_job_id: &BackendJobId) -> anyhow::Result<Vec<ScheduledChild>> {
        let st = self.state.lock().unwrap();
        if *parent_job_id == self.manager_job_id() {
            Ok(st.scheduled.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn job_cmd(&self, job_id: &BackendJobId) -> anyhow::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().cmds.get(&job_id.0).cloned().unwrap_or_default())
    }
}
