//! Scheduler core: owns the pending/running maps and the resource ledger,
//! and implements the tick protocol (spec.md §4.2-§4.7).

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use thiserror::Error;

use crate::backend::{Backend, BackendJobId, JobStatus};
use crate::config::SchedulerConfig;
use crate::graph::{GraphError, GraphModel};
use crate::resources::ResourceLedger;
use crate::task::{Amount, ResourceSet, Successor, Task, TaskBody};

/// Mutable runtime record for a task instance waiting to be submitted.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub job_key: String,
    pub wait_for: BTreeSet<String>,
    /// Number of prior retries of this instance (0 on first entry).
    pub retries: u32,
    pub required_resources: Vec<ResourceSet>,
    pub wait_time: Option<Duration>,
    /// Set only on fan-out units; names the pre-expansion task.
    pub origin: Option<String>,
}

/// What a tick found after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep driving: there is pending or running work.
    Continue,
    /// Nothing pending and nothing running -- the workflow is done.
    Complete,
}

fn format_stuck(stuck: &[(String, BTreeSet<String>)]) -> String {
    stuck
        .iter()
        .map(|(job, waits)| format!("{job} waits for {waits:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job dependency cycle detected: {}", format_stuck(stuck))]
    DependencyCycle { stuck: Vec<(String, BTreeSet<String>)> },

    #[error("submission failed for job {job_key}: {source}")]
    SubmissionFailed {
        job_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("backend error while checking job {job_key}: {source}")]
    BackendQuery {
        job_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job_key}'s on_finish names unknown task {successor:?}")]
    UnknownSuccessor { job_key: String, successor: String },
}

/// Owns pending/running state, the resource ledger, and the scheduler's
/// private working copy of the declared graph.
///
/// The declared graph is never mutated: fan-out expansion and retry
/// bookkeeping happen only in this scheduler's own state (see the
/// "Mutable in-place graph" design note).
pub struct Scheduler {
    config: SchedulerConfig,
    live_tasks: IndexMap<String, Task>,
    pending: IndexMap<String, PendingJob>,
    running: IndexMap<String, BackendJobId>,
    resources: ResourceLedger,
    retry_budget: BTreeMap<String, u32>,
    fanout_units: BTreeMap<String, Vec<String>>,
    start_time: Instant,
}

impl Scheduler {
    /// Build an (empty, not-yet-seeded) scheduler from a declared graph.
    /// Resource capacities are computed once here, over the declared
    /// form, before any fan-out expansion happens.
    pub fn new(graph: &GraphModel, config: SchedulerConfig, start_time: Instant) -> Self {
        let all_sets: Vec<&ResourceSet> = graph.tasks().flat_map(|t| t.required_resources.iter()).collect();
        let resources = ResourceLedger::with_capacities(all_sets);

        let mut live_tasks = IndexMap::new();
        let mut retry_budget = BTreeMap::new();
        for task in graph.tasks() {
            retry_budget.insert(task.task_id.clone(), task.retries);
            live_tasks.insert(task.task_id.clone(), task.clone());
        }

        Self {
            config,
            live_tasks,
            pending: IndexMap::new(),
            running: IndexMap::new(),
            resources,
            retry_budget,
            fanout_units: BTreeMap::new(),
            start_time,
        }
    }

    pub fn pending(&self) -> &IndexMap<String, PendingJob> {
        &self.pending
    }

    pub fn running(&self) -> &IndexMap<String, BackendJobId> {
        &self.running
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    /// Seed the initial pending set from a list of starting task ids
    /// (either `--starting-job` flags, or the resolved resume frontier).
    pub fn seed_starting_jobs(&mut self, starting: &[String]) -> Result<(), SchedulerError> {
        for task_id in starting {
            self.add_initial_pending_job(task_id)?;
        }
        Ok(())
    }

    fn add_initial_pending_job(&mut self, task_id: &str) -> Result<(), SchedulerError> {
        let wait_for = self
            .live_tasks
            .get(task_id)
            .ok_or_else(|| GraphError::UnknownTask(task_id.to_string()))?
            .wait_for
            .clone();
        self.add_pending_job(task_id, wait_for, 0);
        Ok(())
    }

    /// Add `job_key` as a fresh pending job, expanding it into `N`
    /// fan-out units on first entry if its declared task carries a
    /// `parallel_arg` template (spec.md §4.7).
    fn add_pending_job(&mut self, job_key: &str, wait_for: BTreeSet<String>, retries: u32) {
        let parallel_arg = self.live_tasks.get(job_key).and_then(|t| t.parallel_arg.clone());
        match parallel_arg {
            Some(template) => self.expand_fanout(job_key, &template, wait_for, retries),
            None => {
                let task = self.live_tasks.get(job_key).expect("task exists for pending job");
                self.pending.insert(
                    job_key.to_string(),
                    PendingJob {
                        job_key: job_key.to_string(),
                        wait_for,
                        retries,
                        required_resources: task.required_resources.clone(),
                        wait_time: task.wait_time,
                        origin: None,
                    },
                );
            }
        }
    }

    fn expand_fanout(&mut self, original_id: &str, template: &str, wait_for: BTreeSet<String>, retries: u32) {
        let n = self.config.parallelization.max(1);
        let original = self
            .live_tasks
            .shift_remove(original_id)
            .expect("fan-out task exists");
        let original_budget = self.retry_budget.remove(original_id).unwrap_or(original.retries);

        let mut unit_ids = Vec::with_capacity(n as usize);
        for i in 0..n {
            let unit_id = format!("{original_id}_{i}");
            unit_ids.push(unit_id.clone());

            let mut unit = original.clone();
            unit.task_id = unit_id.clone();
            unit.parallel_arg = None; // never re-expand an already-expanded unit.

            let parg = template.replace("%d", &i.to_string());
            if let TaskBody::Command { init_args, retry_args, .. } = &mut unit.body {
                init_args.push(parg.clone());
                retry_args.push(parg);
            }

            let divisor = Amount::from_integer(n as i64);
            unit.required_resources = original
                .required_resources
                .iter()
                .map(|set| set.iter().map(|(name, amount)| (name.clone(), *amount / divisor)).collect())
                .collect();

            if i != 0 {
                // Only unit 0 keeps its on_finish successor edges. Every
                // successor named by another unit's on_finish becomes a
                // static wait_for edge on that successor instead.
                let mut rewritten = BTreeMap::new();
                for (outcome, successors) in &unit.on_finish {
                    let mut kept = Vec::new();
                    for succ in successors {
                        match succ {
                            Successor::Retry => kept.push(Successor::Retry),
                            Successor::Task(next_id) => {
                                self.add_static_wait_for(next_id, &unit_id);
                            }
                        }
                    }
                    rewritten.insert(outcome.clone(), kept);
                }
                unit.on_finish = rewritten;
            }

            self.live_tasks.insert(unit_id.clone(), unit);
            self.retry_budget.insert(unit_id, original_budget);
        }

        // Every other task that already waits on the original id now
        // waits on all N units instead.
        let waiters: Vec<String> = self
            .live_tasks
            .iter()
            .filter(|(_, t)| t.wait_for.contains(original_id))
            .map(|(id, _)| id.clone())
            .collect();
        for waiter in waiters {
            if let Some(t) = self.live_tasks.get_mut(&waiter) {
                t.wait_for.remove(original_id);
                t.wait_for.extend(unit_ids.iter().cloned());
            }
            if let Some(p) = self.pending.get_mut(&waiter) {
                p.wait_for.remove(original_id);
                p.wait_for.extend(unit_ids.iter().cloned());
            }
        }

        self.fanout_units.insert(original_id.to_string(), unit_ids.clone());

        for unit_id in &unit_ids {
            let unit = self.live_tasks.get(unit_id).expect("unit just inserted");
            self.pending.insert(
                unit_id.clone(),
                PendingJob {
                    job_key: unit_id.clone(),
                    wait_for: wait_for.clone(),
                    retries,
                    required_resources: unit.required_resources.clone(),
                    wait_time: unit.wait_time,
                    origin: Some(original_id.to_string()),
                },
            );
        }
    }

    /// Add `waits_on` to `next_id`'s wait_for, or to every unit of
    /// `next_id` if it was itself already fan-out expanded.
    fn add_static_wait_for(&mut self, next_id: &str, waits_on: &str) {
        if self.live_tasks.contains_key(next_id) {
            if let Some(t) = self.live_tasks.get_mut(next_id) {
                t.wait_for.insert(waits_on.to_string());
            }
            if let Some(p) = self.pending.get_mut(next_id) {
                p.wait_for.insert(waits_on.to_string());
            }
        } else if let Some(units) = self.fanout_units.get(next_id).cloned() {
            for unit in units {
                if let Some(t) = self.live_tasks.get_mut(&unit) {
                    t.wait_for.insert(waits_on.to_string());
                }
                if let Some(p) = self.pending.get_mut(&unit) {
                    p.wait_for.insert(waits_on.to_string());
                }
            }
        }
    }

    /// One tick: check running jobs, then admit pending jobs, then report
    /// whether the workflow is complete.
    pub async fn tick(&mut self, backend: &dyn Backend, now: Instant) -> Result<TickOutcome, SchedulerError> {
        tracing::debug!(pending = self.pending.len(), running = self.running.len(), "tick");
        self.check_running_jobs(backend).await?;
        if !self.pending.is_empty() {
            self.run_pending_jobs(backend, now).await?;
        } else if self.running.is_empty() {
            return Ok(TickOutcome::Complete);
        }
        Ok(TickOutcome::Continue)
    }

    async fn check_running_jobs(&mut self, backend: &dyn Backend) -> Result<(), SchedulerError> {
        let keys: Vec<String> = self.running.keys().cloned().collect();
        for key in keys {
            let Some(job_id) = self.running.get(&key).cloned() else {
                continue; // already handled (idempotence of completion).
            };
            let status = backend
                .status(&job_id)
                .await
                .map_err(|source| SchedulerError::BackendQuery { job_key: key.clone(), source })?;

            let outcome = match status {
                JobStatus::StillRunning => {
                    tracing::debug!(job_key = %key, %job_id, "still running");
                    continue;
                }
                JobStatus::Finished(outcome) => outcome,
            };

            tracing::info!(job_key = %key, %job_id, %outcome, "job finished");

            for p in self.pending.values_mut() {
                p.wait_for.remove(&key);
            }
            for t in self.live_tasks.values_mut() {
                t.wait_for.remove(&key);
            }

            for successor in self.successors_for(&key, &outcome) {
                match successor {
                    Successor::Retry => {
                        let budget = self.retry_budget.entry(key.clone()).or_insert(0);
                        if *budget > 0 {
                            *budget -= 1;
                            tracing::warn!(job_key = %key, %outcome, "retrying job");
                            self.add_pending_job(&key, BTreeSet::new(), 1);
                        }
                        // else: retry budget exhausted, task is dropped.
                    }
                    Successor::Task(next_id) => {
                        if self.pending.contains_key(&next_id) {
                            tracing::error!(job_key = %next_id, "job already pending, skipping duplicate");
                        } else if let Some(task) = self.live_tasks.get(&next_id) {
                            let wait_for = task.wait_for.clone();
                            self.add_pending_job(&next_id, wait_for, 0);
                        } else {
                            return Err(SchedulerError::UnknownSuccessor {
                                job_key: key.clone(),
                                successor: next_id,
                            });
                        }
                    }
                }
            }

            self.resources.release(&key);
            self.running.shift_remove(&key);
        }
        Ok(())
    }

    fn successors_for(&self, job_key: &str, outcome: &str) -> Vec<Successor> {
        if self.config.only_starting_jobs {
            return Vec::new();
        }
        let Some(task) = self.live_tasks.get(job_key) else {
            return Vec::new();
        };
        if let Some(successors) = task.on_finish.get(outcome) {
            return successors.clone();
        }
        if self.config.failed_outcomes.contains(outcome) {
            return task.on_finish.get("failed").cloned().unwrap_or_default();
        }
        task.on_finish.get("default").cloned().unwrap_or_default()
    }

    fn must_wait_time(&self, wait_time: Option<Duration>, now: Instant) -> bool {
        match wait_time {
            Some(wt) => now.saturating_duration_since(self.start_time) < wt,
            None => false,
        }
    }

    async fn run_pending_jobs(&mut self, backend: &dyn Backend, now: Instant) -> Result<(), SchedulerError> {
        let max_running = self.config.max_running_jobs.unwrap_or(usize::MAX);

        // Pass A: strict dependencies.
        let mut keys: Vec<String> = self.pending.keys().cloned().collect();
        keys.sort();
        for key in keys {
            if self.running.len() >= max_running {
                break;
            }
            let Some(pj) = self.pending.get(&key) else { continue };
            if !pj.wait_for.is_empty() {
                continue;
            }
            if self.must_wait_time(pj.wait_time, now) {
                tracing::info!(job_key = %key, "must wait for wait_time to elapse");
                continue;
            }
            let required_resources = pj.required_resources.clone();
            if !self.resources.try_acquire(&key, &required_resources) {
                continue;
            }
            self.start_job(&key, backend).await?;
        }

        // Pass B: stalemate escape. Only entered when pending is
        // non-empty, nothing is running, and no pending job is gated on
        // a live wait_time.
        if self.pending.is_empty()
            || !self.running.is_empty()
            || self.pending.values().any(|p| p.wait_time.is_some())
        {
            return Ok(());
        }

        let mut keys: Vec<String> = self.pending.keys().cloned().collect();
        keys.sort();
        let mut started_origin: Option<Option<String>> = None;
        for key in keys {
            if self.running.len() >= max_running {
                break;
            }
            let Some(pj) = self.pending.get(&key) else { continue };
            let all_unknown = pj.wait_for.iter().all(|w| !self.pending.contains_key(w));
            if !all_unknown {
                continue;
            }
            if let Some(started) = &started_origin {
                if &pj.origin != started {
                    continue;
                }
            }
            let required_resources = pj.required_resources.clone();
            if !self.resources.try_acquire(&key, &required_resources) {
                continue;
            }
            let origin = pj.origin.clone();
            self.start_job(&key, backend).await?;
            if started_origin.is_none() {
                started_origin = Some(origin);
            }
        }

        if self.running.is_empty() {
            let stuck = self.pending.iter().map(|(k, p)| (k.clone(), p.wait_for.clone())).collect();
            return Err(SchedulerError::DependencyCycle { stuck });
        }

        Ok(())
    }

    /// Submit `key` (already resource-acquired) and move it from pending
    /// to running, releasing the just-acquired resources on failure.
    async fn start_job(&mut self, key: &str, backend: &dyn Backend) -> Result<(), SchedulerError> {
        match self.submit(key, backend).await {
            Ok(Some(job_id)) => {
                self.pending.shift_remove(key);
                self.running.insert(key.to_string(), job_id);
            }
            Ok(None) => {
                // Backend declined to schedule; stays pending.
                self.resources.release(key);
            }
            Err(source) => {
                self.resources.release(key);
                return Err(SchedulerError::SubmissionFailed { job_key: key.to_string(), source });
            }
        }
        Ok(())
    }

    async fn submit(&self, key: &str, backend: &dyn Backend) -> anyhow::Result<Option<BackendJobId>> {
        let task = self.live_tasks.get(key).expect("pending job has a live task");
        let retrying = self.pending.get(key).map(|p| p.retries > 0).unwrap_or(false);
        match &task.body {
            TaskBody::Programmatic(job) => {
                tracing::info!(job_key = %key, retrying, "running programmatic job");
                job.run(retrying).await
            }
            TaskBody::Command { .. } => {
                let (command, args) = task.command_line(retrying).expect("command task has a command line");
                let mut cmd = Vec::with_capacity(args.len() + 1);
                cmd.push(command);
                cmd.extend(args);
                tracing::info!(job_key = %key, retrying, cmd = ?cmd, "scheduling job");
                backend
                    .schedule(&cmd, &task.tags, task.units.as_deref(), task.project_id.as_deref())
                    .await
            }
        }
    }
}
