//! Execution planning.
//!
//! Turns a task graph into an ordered list of phases. Each phase holds the
//! tasks whose dependencies were all placed in earlier phases, so running
//! phases one after another always respects the dependency order.

use crate::core::{critical_path, total_duration, Task, TaskGraph, TaskId, TaskKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How phases are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One task at a time.
    Sequential,
    /// Parallelizable tasks of a phase run concurrently.
    Parallel,
    /// Parallel if any task is parallelizable, sequential otherwise.
    #[default]
    Adaptive,
}

impl Strategy {
    /// Resolve `Adaptive` against the task set. Decided once per plan.
    pub fn resolve(self, graph: &TaskGraph) -> Strategy {
        match self {
            Strategy::Adaptive if graph.tasks().any(|t| t.parallelizable) => Strategy::Parallel,
            Strategy::Adaptive => Strategy::Sequential,
            other => other,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Parallel => write!(f, "parallel"),
            Strategy::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Strategy::Sequential),
            "parallel" => Ok(Strategy::Parallel),
            "adaptive" => Ok(Strategy::Adaptive),
            other => Err(Error::Validation(format!("unknown strategy: {}", other))),
        }
    }
}

/// A batch of tasks whose dependencies are satisfied by earlier phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub index: usize,
    pub name: String,
    pub tasks: Vec<TaskId>,
    pub parallel: bool,
    pub estimated_duration: u64,
}

/// The scheduling output consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Strategy after resolving `Adaptive`.
    pub strategy: Strategy,
    pub requested_strategy: Strategy,
    pub phases: Vec<Phase>,
    pub critical_path: Vec<TaskId>,
    pub critical_path_duration: u64,
    /// Sum of every task's estimate.
    pub total_duration: u64,
    /// Sum of the phase estimates.
    pub estimated_duration: u64,
    pub parallelization_savings: u64,
}

impl ExecutionPlan {
    pub fn task_count(&self) -> usize {
        self.phases.iter().map(|p| p.tasks.len()).sum()
    }

    /// All task ids in phase order.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.phases.iter().flat_map(|p| p.tasks.iter())
    }

    /// Index of the phase that holds the task.
    pub fn phase_of(&self, id: &TaskId) -> Option<usize> {
        self.phases
            .iter()
            .find(|p| p.tasks.contains(id))
            .map(|p| p.index)
    }
}

/// Partition a task graph into phases.
///
/// # Errors
/// Returns [`Error::Planning`] when tasks remain but none of them is ready,
/// which means the graph has a cycle or a dangling dependency that
/// validation should have rejected.
pub fn create_execution_plan(graph: &TaskGraph, strategy: Strategy) -> Result<ExecutionPlan> {
    let resolved = strategy.resolve(graph);
    let mut assigned: HashMap<&TaskId, usize> = HashMap::new();
    let mut remaining: Vec<&Task> = graph.tasks().collect();
    let mut phases: Vec<Phase> = Vec::new();

    while !remaining.is_empty() {
        let index = phases.len();
        let (mut ready, blocked): (Vec<&Task>, Vec<&Task>) =
            remaining.into_iter().partition(|task| {
                task.dependencies
                    .iter()
                    .all(|dep| assigned.get(dep).is_some_and(|&phase| phase < index))
            });

        if ready.is_empty() {
            let stuck: Vec<&str> = blocked.iter().map(|t| t.id.as_str()).collect();
            return Err(Error::Planning(format!(
                "no task is ready while {} remain unassigned: {}",
                stuck.len(),
                stuck.join(", ")
            )));
        }

        // Stable: equal priorities keep insertion order.
        ready.sort_by_key(|task| task.priority);
        for task in &ready {
            assigned.insert(&task.id, index);
        }
        phases.push(build_phase(index, &ready, resolved));
        remaining = blocked;
    }

    let serial_duration = total_duration(graph.tasks().map(|t| t.estimated_duration));
    let estimated_duration = total_duration(phases.iter().map(|p| p.estimated_duration));
    let (critical_path, critical_path_duration) = critical_path(graph).unwrap_or_default();

    let plan = ExecutionPlan {
        strategy: resolved,
        requested_strategy: strategy,
        phases,
        critical_path,
        critical_path_duration,
        total_duration: serial_duration,
        estimated_duration,
        parallelization_savings: serial_duration.saturating_sub(estimated_duration),
    };
    tracing::info!(
        strategy = %plan.strategy,
        phases = plan.phases.len(),
        tasks = plan.task_count(),
        savings = plan.parallelization_savings,
        "execution plan created"
    );
    Ok(plan)
}

fn build_phase(index: usize, ready: &[&Task], strategy: Strategy) -> Phase {
    let concurrent = ready.iter().filter(|t| t.parallelizable).count();
    let parallel = strategy == Strategy::Parallel && concurrent > 1;

    let estimated_duration = if parallel {
        // Parallelizable tasks overlap; the rest run alone after them.
        let batch = ready
            .iter()
            .filter(|t| t.parallelizable)
            .map(|t| t.estimated_duration)
            .max()
            .unwrap_or(0);
        let exclusive = total_duration(
            ready
                .iter()
                .filter(|t| !t.parallelizable)
                .map(|t| t.estimated_duration),
        );
        batch.saturating_add(exclusive)
    } else {
        total_duration(ready.iter().map(|t| t.estimated_duration))
    };

    Phase {
        index,
        name: dominant_kind(ready).label().to_string(),
        tasks: ready.iter().map(|t| t.id.clone()).collect(),
        parallel,
        estimated_duration,
    }
}

/// Most frequent kind in the phase; ties go to the kind seen first.
fn dominant_kind(tasks: &[&Task]) -> TaskKind {
    let mut counts: Vec<(TaskKind, usize)> = Vec::new();
    for task in tasks {
        match counts.iter_mut().find(|(kind, _)| *kind == task.kind) {
            Some((_, count)) => *count += 1,
            None => counts.push((task.kind, 1)),
        }
    }
    let mut best: Option<(TaskKind, usize)> = None;
    for (kind, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((kind, count));
        }
    }
    best.map(|(kind, _)| kind).unwrap_or_default()
}
