//! Graph model: the declarative description of a workflow, supplied
//! either programmatically (a tree of [`TaskNode`]s) or as a serialized
//! mapping that replaces it wholesale (see [`crate::yaml`]).

use indexmap::IndexMap;
use thiserror::Error;

use crate::task::{Successor, Task};

/// Errors raised while assembling a [`GraphModel`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow inconsistency detected: task {0:?} referenced twice")]
    DuplicateTaskId(String),
    #[error("jobs graph configuration is empty")]
    EmptyGraph,
    #[error("invalid job: {0:?}")]
    UnknownTask(String),
}

/// A task together with its direct successors, for the programmatic
/// construction path (`configure_workflow`-style).
///
/// Mirrors the source's recursive `_add_task`: a task object knows its own
/// next tasks, and the graph is built by transitively walking them.
pub struct TaskNode {
    pub task: Task,
    pub successors: Vec<TaskNode>,
}

impl TaskNode {
    pub fn leaf(task: Task) -> Self {
        Self {
            task,
            successors: Vec::new(),
        }
    }

    pub fn with_successors(task: Task, successors: Vec<TaskNode>) -> Self {
        Self { task, successors }
    }
}

/// The declared graph: tasks by id, read-only once built.
///
/// Immutable by construction -- fan-out expansion and retry bookkeeping
/// happen on the scheduler's own working copy, never here (see the
/// "Mutable in-place graph" design note).
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    tasks: IndexMap<String, Task>,
    /// Direct-successor ids per task, used by the resume protocol to walk
    /// forward from an already-ran task (spec.md §4.8). For a programmatic
    /// tree this is the declared child structure; for a flat/serialized
    /// graph there is no such structure, so it is derived from the task's
    /// own `on_finish` targets instead.
    successors: IndexMap<String, Vec<String>>,
}

impl GraphModel {
    /// Build a graph from a flat list of tasks, erroring on duplicate ids.
    /// Successor edges are derived from each task's `on_finish` targets,
    /// since a flat graph has no separate notion of "next".
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self, GraphError> {
        let mut model = GraphModel::default();
        for task in tasks {
            let derived = derive_successors(&task);
            let task_id = task.task_id.clone();
            model.insert(task)?;
            model.successors.insert(task_id, derived);
        }
        Ok(model)
    }

    /// Build a graph by transitively walking a forest of [`TaskNode`]s,
    /// the programmatic `configure_workflow` shape. Successor edges are
    /// the declared tree structure itself.
    pub fn from_roots(roots: impl IntoIterator<Item = TaskNode>) -> Result<Self, GraphError> {
        let mut model = GraphModel::default();
        for root in roots {
            model.add_node(root)?;
        }
        Ok(model)
    }

    fn add_node(&mut self, node: TaskNode) -> Result<(), GraphError> {
        let task_id = node.task.task_id.clone();
        let successor_ids = node.successors.iter().map(|n| n.task.task_id.clone()).collect();
        self.insert(node.task)?;
        self.successors.insert(task_id, successor_ids);
        for successor in node.successors {
            self.add_node(successor)?;
        }
        Ok(())
    }

    fn insert(&mut self, task: Task) -> Result<(), GraphError> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(GraphError::DuplicateTaskId(task.task_id));
        }
        self.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    /// Direct successors of `task_id`, for resume frontier resolution.
    pub fn successors_of(&self, task_id: &str) -> Vec<String> {
        self.successors.get(task_id).cloned().unwrap_or_default()
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn validate_nonempty(&self) -> Result<(), GraphError> {
        if self.tasks.is_empty() {
            Err(GraphError::EmptyGraph)
        } else {
            Ok(())
        }
    }
}

/// Distinct `Successor::Task` targets named across all of a task's
/// `on_finish` entries, in first-seen order. `Successor::Retry` has no
/// target and is skipped.
fn derive_successors(task: &Task) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for successors in task.on_finish.values() {
        for successor in successors {
            if let Successor::Task(id) = successor {
                if seen.insert(id.clone()) {
                    out.push(id.clone());
                }
            }
        }
    }
    out
}
