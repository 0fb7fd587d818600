//! Declared task types -- the immutable description of one node in a
//! workflow graph.
//!
//! A [`Task`] is supplied by the user, either built programmatically with
//! [`TaskBuilder`] or parsed from a serialized graph (see [`crate::yaml`]).
//! Once constructed it never changes: fan-out expansion and retry
//! bookkeeping live on the [`crate::scheduler::Scheduler`], not on the
//! declaration itself (see the "Mutable in-place graph" design note).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_rational::Ratio;

use crate::backend::BackendJobId;

/// A resource requirement amount. Exact rationals avoid drift when a
/// fan-out task divides its requirements by the unit count.
pub type Amount = Ratio<i64>;

/// One conjunctive bundle of named resource quantities.
///
/// A task's `required_resources` is a *disjunction* over resource sets:
/// the first set that is fully satisfiable is the one acquired. This is
/// easy to misread as a conjunction -- it is not.
pub type ResourceSet = BTreeMap<String, Amount>;

/// A successor named in an `on_finish` routing entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Successor {
    /// Re-enqueue the same task as a fresh pending instance.
    Retry,
    /// Add the named task as a fresh pending job.
    Task(String),
}

/// Hook for a programmatically-defined task: a unit of work that schedules
/// itself rather than going through [`crate::backend::Backend::schedule`]
/// with a plain command line.
///
/// Tasks come in two shapes, modeled as a tagged variant rather than
/// through inheritance: [`TaskBody::Command`] for the common declarative
/// case, and [`TaskBody::Programmatic`] for one that overrides its own
/// run behavior.
#[async_trait]
pub trait ProgrammaticJob: Send + Sync {
    /// Run this task, returning the backend job id if one was scheduled.
    /// `retries` mirrors the retry flag passed to ordinary command tasks.
    async fn run(&self, retries: bool) -> anyhow::Result<Option<BackendJobId>>;
}

/// The two shapes a task's executable body can take.
#[derive(Clone)]
pub enum TaskBody {
    /// A command line assembled from `init_args`/`retry_args` and handed
    /// to the backend adapter.
    Command {
        command: String,
        init_args: Vec<String>,
        retry_args: Vec<String>,
    },
    /// A task that knows how to schedule itself.
    Programmatic(Arc<dyn ProgrammaticJob>),
}

impl std::fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command {
                command,
                init_args,
                retry_args,
            } => f
                .debug_struct("Command")
                .field("command", command)
                .field("init_args", init_args)
                .field("retry_args", retry_args)
                .finish(),
            Self::Programmatic(_) => f.write_str("Programmatic(..)"),
        }
    }
}

/// Immutable, user-supplied description of one workflow node.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub body: TaskBody,
    pub tags: Vec<String>,
    pub units: Option<String>,
    pub project_id: Option<String>,
    /// Disjunction of resource sets; the first one satisfiable is used.
    pub required_resources: Vec<ResourceSet>,
    pub wait_for: std::collections::BTreeSet<String>,
    /// `None` means no timer; otherwise relative to workflow start.
    pub wait_time: Option<Duration>,
    /// Retry budget remaining for this declaration.
    pub retries: u32,
    /// outcome key -> ordered successors. Recognized keys: any concrete
    /// outcome string, `"failed"` (matches the configured failed-outcome
    /// set), `"default"` (matches anything else).
    pub on_finish: BTreeMap<String, Vec<Successor>>,
    /// Template containing `%d`; presence signals fan-out.
    pub parallel_arg: Option<String>,
}

impl Task {
    /// Start building a plain command task.
    pub fn command(task_id: impl Into<String>, command: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(task_id.into(), TaskBody::Command {
            command: command.into(),
            init_args: Vec::new(),
            retry_args: Vec::new(),
        })
    }

    /// Start building a task with a custom run hook.
    pub fn programmatic(task_id: impl Into<String>, job: Arc<dyn ProgrammaticJob>) -> TaskBuilder {
        TaskBuilder::new(task_id.into(), TaskBody::Programmatic(job))
    }

    /// The command line to assemble for this attempt, if this is a
    /// [`TaskBody::Command`] task.
    pub fn command_line(&self, retrying: bool) -> Option<(String, Vec<String>)> {
        match &self.body {
            TaskBody::Command {
                command,
                init_args,
                retry_args,
            } => {
                let args = if retrying { retry_args } else { init_args };
                Some((command.clone(), args.clone()))
            }
            TaskBody::Programmatic(_) => None,
        }
    }
}

/// Builder for [`Task`]; mirrors the declarative field set in spec.md §3.
pub struct TaskBuilder {
    task_id: String,
    body: TaskBody,
    tags: Vec<String>,
    units: Option<String>,
    project_id: Option<String>,
    required_resources: Vec<ResourceSet>,
    wait_for: std::collections::BTreeSet<String>,
    wait_time: Option<Duration>,
    retries: u32,
    on_finish: BTreeMap<String, Vec<Successor>>,
    parallel_arg: Option<String>,
}

impl TaskBuilder {
    fn new(task_id: String, body: TaskBody) -> Self {
        Self {
            task_id,
            body,
            tags: Vec::new(),
            units: None,
            project_id: None,
            required_resources: Vec::new(),
            wait_for: Default::default(),
            wait_time: None,
            retries: 0,
            on_finish: BTreeMap::new(),
            parallel_arg: None,
        }
    }

    pub fn init_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let TaskBody::Command { init_args, .. } = &mut self.body {
            *init_args = args.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Set `retry_args`. If never called, retries reuse `init_args`.
    pub fn retry_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let TaskBody::Command { retry_args, .. } = &mut self.body {
            *retry_args = args.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Add one disjunctive resource set. Call multiple times to add
    /// alternative sets, tried in the order added.
    pub fn require(mut self, resources: ResourceSet) -> Self {
        self.required_resources.push(resources);
        self
    }

    pub fn wait_for(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.wait_for.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn on_finish(mut self, outcome: impl Into<String>, successors: Vec<Successor>) -> Self {
        self.on_finish.insert(outcome.into(), successors);
        self
    }

    pub fn parallel_arg(mut self, template: impl Into<String>) -> Self {
        self.parallel_arg = Some(template.into());
        self
    }

    pub fn build(self) -> Task {
        let (init_args, retry_args_empty) = match &self.body {
            TaskBody::Command {
                init_args,
                retry_args,
                ..
            } => (init_args.clone(), retry_args.is_empty()),
            TaskBody::Programmatic(_) => (Vec::new(), true),
        };
        let mut body = self.body;
        // retry_args defaults to init_args when never set explicitly.
        if retry_args_empty {
            if let TaskBody::Command { retry_args, .. } = &mut body {
                *retry_args = init_args;
            }
        }
        Task {
            task_id: self.task_id,
            body,
            tags: self.tags,
            units: self.units,
            project_id: self.project_id,
            required_resources: self.required_resources,
            wait_for: self.wait_for,
            wait_time: self.wait_time,
            retries: self.retries,
            on_finish: self.on_finish,
            parallel_arg: self.parallel_arg,
        }
    }
}
