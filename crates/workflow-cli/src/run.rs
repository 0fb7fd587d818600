//! Driver loop: calls the scheduler's tick at a fixed cadence until it
//! signals completion (spec.md §4.2, §6).

use std::time::{Duration, Instant};

use workflow_core::{resume, Backend, BackendJobId, GraphModel, ResumeError, Scheduler, SchedulerConfig, TickOutcome};

use crate::args::Cli;
use crate::process_backend::ProcessBackend;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let graph = workflow_core::parse_graph_yaml(&cli.jobs_graph)?;
    graph.validate_nonempty()?;

    let config = SchedulerConfig::new()
        .with_extra_failed_outcomes(cli.failed_outcomes.clone())
        .with_max_running_jobs(cli.max_running_jobs)
        .with_only_starting_jobs(cli.only_starting_jobs)
        .with_parallelization(cli.parallelization);

    let backend = ProcessBackend::new(&cli.manager_name);

    let starting = resolve_starting_set(&cli, &graph, &backend).await?;
    if starting.is_empty() {
        return Err(ResumeError::NoStartingJobs.into());
    }

    let start_time = Instant::now();
    let mut scheduler = Scheduler::new(&graph, config, start_time);
    scheduler.seed_starting_jobs(&starting)?;

    loop {
        match scheduler.tick(&backend, Instant::now()).await? {
            TickOutcome::Complete => break,
            TickOutcome::Continue => tokio::time::sleep(Duration::from_millis(cli.tick_interval_ms)).await,
        }
    }

    Ok(())
}

/// Determine the initial pending set: an explicit `--starting-job` list
/// always wins; otherwise, if resuming, recover it from the prior run's
/// children and recorded command line (spec.md §4.8).
async fn resolve_starting_set(cli: &Cli, graph: &GraphModel, backend: &ProcessBackend) -> anyhow::Result<Vec<String>> {
    let Some(resume_job) = &cli.resume_from_jobid else {
        return Ok(cli.starting_job.clone());
    };

    let resume_job_id = BackendJobId(resume_job.clone());
    let ran = resume::ran_tasks(backend, &cli.manager_name, &resume_job_id).await?;

    let candidates = if !cli.starting_job.is_empty() {
        cli.starting_job.clone()
    } else {
        let argv = backend.job_cmd(&resume_job_id).await?;
        resume::starting_jobs_from_cmd(&argv)
    };

    Ok(resume::resolve_starting_frontier(graph, &ran, &candidates))
}
