//! Task store backed by a dependency graph.
//!
//! `TaskGraph` owns every task of a run and mirrors the declared
//! dependencies as edges in a petgraph `DiGraph`. An edge `a -> b` means
//! "a is a dependency of b". Dependencies on tasks that are not (yet) in the
//! store are kept on the task and become edges once the target is added;
//! the validator reports whatever is still dangling.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Owned arena of tasks indexed by id.
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Build a graph from a task list, rejecting the first invalid task.
    pub fn from_tasks<I: IntoIterator<Item = Task>>(tasks: I) -> Result<Self> {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task)?;
        }
        Ok(graph)
    }

    /// Add a task to the store.
    ///
    /// # Errors
    /// Returns an error if a task with the same id already exists or the
    /// task's estimated duration is zero.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::DuplicateTask(task.id));
        }
        if task.estimated_duration == 0 {
            return Err(Error::Validation(format!(
                "Task {} must have a positive estimated duration",
                task.id
            )));
        }

        let id = task.id.clone();
        let deps = task.dependencies.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id.clone(), index);

        // Edges from dependencies already present (a self-dependency becomes a self-loop).
        for dep in &deps {
            if let Some(&dep_index) = self.task_index.get(dep) {
                self.graph.add_edge(dep_index, index, ());
            }
        }

        // Edges to earlier tasks that were waiting on this one.
        let waiting: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&other| other != index && self.graph[other].dependencies.contains(&id))
            .collect();
        for other in waiting {
            self.graph.add_edge(index, other, ());
        }

        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        match self.task_index.get(id) {
            Some(&index) => self.graph.node_weight_mut(index),
            None => None,
        }
    }

    /// Like `get_mut`, but a missing task is an error.
    pub fn require_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of resolved dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// All task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks().map(|t| t.id.clone()).collect()
    }

    /// Tasks the given task depends on that exist in the store.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, dir: Direction) -> Vec<&Task> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(index, dir).collect();
        // petgraph yields neighbors newest-edge first
        found.sort();
        found.dedup();
        found
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n))
            .collect()
    }

    pub(crate) fn node_index(&self, id: &TaskId) -> Option<NodeIndex> {
        self.task_index.get(id).copied()
    }

    /// The underlying graph, for the validator's algorithms.
    pub(crate) fn graph(&self) -> &DiGraph<Task, ()> {
        &self.graph
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.edge_count())
            .finish()
    }
}
