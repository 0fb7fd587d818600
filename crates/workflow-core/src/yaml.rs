//! Serialized graph override: `--jobs-graph <yaml>` replaces the
//! programmatic graph wholesale when present (spec.md §4.1).
//!
//! The wire shape mirrors the source's flat `jobs_graph` dict: a mapping
//! from task id to job spec. Resource amounts are written as plain
//! integers (`"1"`) or exact fractions (`"1/3"`) to keep the ledger
//! drift-free under fan-out division.

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::graph::{GraphError, GraphModel};
use crate::task::{Amount, ResourceSet, Successor, Task, TaskBody};

#[derive(Debug, Error)]
pub enum GraphParseError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Graph(#[from] GraphError),
    #[error("task {task:?}: invalid resource amount {value:?}: {reason}")]
    InvalidAmount {
        task: String,
        value: String,
        reason: String,
    },
}

fn parse_amount(s: &str) -> Result<Amount, String> {
    match s.split_once('/') {
        Some((n, d)) => {
            let n: i64 = n.trim().parse().map_err(|_| format!("bad numerator in {s:?}"))?;
            let d: i64 = d.trim().parse().map_err(|_| format!("bad denominator in {s:?}"))?;
            Ok(Amount::new(n, d))
        }
        None => {
            let n: i64 = s.trim().parse().map_err(|_| format!("bad amount {s:?}"))?;
            Ok(Amount::from_integer(n))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Int(i64),
    Str(String),
}

impl AmountRepr {
    fn resolve(self) -> Result<Amount, String> {
        match self {
            AmountRepr::Int(i) => Ok(Amount::from_integer(i)),
            AmountRepr::Str(s) => parse_amount(&s),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobSpec {
    command: Option<String>,
    #[serde(default)]
    init_args: Vec<String>,
    retry_args: Option<Vec<String>>,
    #[serde(default)]
    tags: Vec<String>,
    units: Option<String>,
    project_id: Option<String>,
    #[serde(default)]
    required_resources: Vec<IndexMap<String, AmountRepr>>,
    #[serde(default)]
    wait_for: Vec<String>,
    /// Seconds relative to workflow start.
    wait_time: Option<f64>,
    #[serde(default)]
    retries: u32,
    #[serde(default)]
    on_finish: IndexMap<String, Vec<String>>,
    parallel_arg: Option<String>,
}

/// `task_id -> job spec`, the serialized form of a workflow graph.
pub type GraphSpec = IndexMap<String, JobSpec>;

/// Parse a `--jobs-graph` YAML payload into a [`GraphModel`].
pub fn parse_graph_yaml(src: &str) -> Result<GraphModel, GraphParseError> {
    let spec: GraphSpec = serde_yaml::from_str(src)?;
    let mut tasks = Vec::with_capacity(spec.len());
    for (task_id, job) in spec {
        tasks.push(job_spec_to_task(&task_id, job)?);
    }
    Ok(GraphModel::from_tasks(tasks)?)
}

fn job_spec_to_task(task_id: &str, job: JobSpec) -> Result<Task, GraphParseError> {
    let mut required_resources: Vec<ResourceSet> = Vec::with_capacity(job.required_resources.len());
    for set in job.required_resources {
        let mut resolved = ResourceSet::new();
        for (name, amount) in set {
            let amount = amount.resolve().map_err(|reason| GraphParseError::InvalidAmount {
                task: task_id.to_string(),
                value: name.clone(),
                reason,
            })?;
            resolved.insert(name, amount);
        }
        required_resources.push(resolved);
    }

    let on_finish = job
        .on_finish
        .into_iter()
        .map(|(outcome, successors)| {
            let successors = successors
                .into_iter()
                .map(|s| if s == "retry" { Successor::Retry } else { Successor::Task(s) })
                .collect();
            (outcome, successors)
        })
        .collect();

    let command = job.command.unwrap_or_default();
    let init_args = job.init_args;
    let retry_args = job.retry_args.unwrap_or_else(|| init_args.clone());

    Ok(Task {
        task_id: task_id.to_string(),
        body: TaskBody::Command {
            command,
            init_args,
            retry_args,
        },
        tags: job.tags,
        units: job.units,
        project_id: job.project_id,
        required_resources,
        wait_for: job.wait_for.into_iter().collect(),
        wait_time: job.wait_time.map(std::time::Duration::from_secs_f64),
        retries: job.retries,
        on_finish,
        parallel_arg: job.parallel_arg,
    })
}
