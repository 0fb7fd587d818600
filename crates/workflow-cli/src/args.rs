//! CLI surface (spec.md §6): the thin front-end over `workflow-core`.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "workflow-manager", about = "Schedules a declared job graph onto an external execution backend")]
pub struct Cli {
    /// Seed the pending set with this task id. Repeatable.
    #[arg(long = "starting-job")]
    pub starting_job: Vec<String>,

    /// YAML-serialized job graph (the mapping text itself, not a path).
    /// Replaces any programmatically-configured graph wholesale.
    #[arg(long = "jobs-graph")]
    pub jobs_graph: String,

    /// Extend the failed-outcome set beyond the built-in defaults.
    /// Repeatable.
    #[arg(long = "failed-outcomes")]
    pub failed_outcomes: Vec<String>,

    /// Cap on concurrently running jobs.
    #[arg(long = "max-running-jobs")]
    pub max_running_jobs: Option<usize>,

    /// Disable all `on_finish` routing; only the starting jobs run.
    #[arg(long = "only-starting-jobs")]
    pub only_starting_jobs: bool,

    /// Fan-out multiplicity applied to every task with a `parallel_arg`.
    #[arg(long = "parallelization", default_value_t = 1)]
    pub parallelization: u32,

    /// Resume from a prior manager run, identified by its backend job id.
    #[arg(long = "resume-from-jobid")]
    pub resume_from_jobid: Option<String>,

    /// Ignored; exists only so that two otherwise-identical invocations
    /// hash differently.
    #[arg(long = "comment")]
    pub comment: Option<String>,

    /// Name this manager tags its scheduled children with
    /// (`manager_name/task_id`), and checks on resume.
    #[arg(long = "manager-name", default_value = "workflow-manager")]
    pub manager_name: String,

    /// Sleep between ticks, in milliseconds.
    #[arg(long = "tick-interval-ms", default_value_t = 200)]
    pub tick_interval_ms: u64,
}
