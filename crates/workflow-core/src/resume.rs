//! Resume protocol: recover a prior run's progress from the backend's own
//! job history rather than any local store (spec.md §4.8).

use std::collections::BTreeMap;

use thiserror::Error;

use crate::backend::{Backend, BackendJobId};
use crate::graph::GraphModel;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("resume job's children belong to manager {found:?}, expected {expected:?}")]
    ManagerMismatch { expected: String, found: String },
    #[error("missing starting set: pass --starting-job or --resume-from-jobid")]
    NoStartingJobs,
}

/// Look up a prior run's scheduled children and classify each by the task
/// id it was scheduled for, keyed under `manager_name/task_id` (spec.md
/// §4.8's naming convention for scheduled children).
pub async fn ran_tasks(
    backend: &dyn Backend,
    manager_name: &str,
    resume_job_id: &BackendJobId,
) -> anyhow::Result<BTreeMap<String, BackendJobId>> {
    let children = backend.lookup_scheduled_children(resume_job_id).await?;
    let mut ran = BTreeMap::new();
    for child in children {
        let (found_manager, task_id) = child
            .name
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("malformed scheduled child name {:?}", child.name))?;
        if found_manager != manager_name {
            return Err(ResumeError::ManagerMismatch {
                expected: manager_name.to_string(),
                found: found_manager.to_string(),
            }
            .into());
        }
        ran.insert(task_id.to_string(), child.job_id);
    }
    Ok(ran)
}

/// Parse a prior run's recorded command line for `--starting-job` values,
/// accepting both `--starting-job=X` and `--starting-job X` forms.
pub fn starting_jobs_from_cmd(argv: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut want_value = false;
    for arg in argv {
        if want_value {
            out.push(arg.clone());
            want_value = false;
            continue;
        }
        if let Some(rest) = arg.strip_prefix("--starting-job") {
            if let Some(value) = rest.strip_prefix('=') {
                out.push(value.to_string());
            } else if rest.is_empty() {
                want_value = true;
            }
        }
    }
    out
}

/// Starting from `candidates` (the prior run's `--starting-job` set),
/// recurse into already-ran tasks' declared successors to find the first
/// frontier of tasks that have *not* already run.
///
/// Bug-compatible with the source: a task with no declared successors is
/// simply a dead end even if it already ran, producing no frontier entry
/// for that branch.
pub fn resolve_starting_frontier(
    graph: &GraphModel,
    ran: &BTreeMap<String, BackendJobId>,
    candidates: &[String],
) -> Vec<String> {
    let mut frontier = Vec::new();
    resolve_rec(graph, ran, candidates, &mut frontier);
    frontier
}

fn resolve_rec(graph: &GraphModel, ran: &BTreeMap<String, BackendJobId>, candidates: &[String], out: &mut Vec<String>) {
    for task_id in candidates {
        if ran.contains_key(task_id) {
            let next = graph.successors_of(task_id);
            if !next.is_empty() {
                resolve_rec(graph, ran, &next, out);
            }
        } else {
            out.push(task_id.clone());
        }
    }
}
