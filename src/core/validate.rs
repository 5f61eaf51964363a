//! Graph validation: cycles, dangling dependencies and the critical path.

use crate::core::graph::TaskGraph;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

/// A dependency that points at a task missing from the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedDependency {
    pub task: TaskId,
    pub missing: TaskId,
}

impl std::fmt::Display for OrphanedDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} depends on missing task: {}", self.task, self.missing)
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Each entry lists the tasks of one cycle, in insertion order.
    pub cycles: Vec<Vec<TaskId>>,
    pub orphaned: Vec<OrphanedDependency>,
    pub critical_path: Vec<TaskId>,
    pub critical_path_duration: u64,
    /// Sum of every task's estimated duration.
    pub total_estimated_time: u64,
}

impl ValidationReport {
    /// Human-readable description of every problem found.
    pub fn problems(&self) -> Vec<String> {
        let cycles = self.cycles.iter().map(|cycle| {
            let names: Vec<&str> = cycle.iter().map(TaskId::as_str).collect();
            format!("Circular dependency detected: {}", names.join(" -> "))
        });
        cycles
            .chain(self.orphaned.iter().map(ToString::to_string))
            .collect()
    }

    /// Every task id involved in a problem, without repeats.
    pub fn offending_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = Vec::new();
        let all = self
            .cycles
            .iter()
            .flatten()
            .chain(self.orphaned.iter().map(|o| &o.task));
        for id in all {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Turn an invalid report into an [`Error::Graph`].
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(Error::Graph(Box::new(self)))
        }
    }
}

/// Validate a task graph.
///
/// Reports every cycle and dangling dependency and computes the critical
/// path. The critical path is only meaningful for an acyclic graph and is
/// left empty otherwise.
pub fn validate(graph: &TaskGraph) -> ValidationReport {
    let cycles = find_cycles(graph);
    let orphaned = find_orphans(graph);
    let (critical_path, critical_path_duration) = if cycles.is_empty() {
        critical_path(graph).unwrap_or_default()
    } else {
        (Vec::new(), 0)
    };
    let total_estimated_time = total_duration(graph.tasks().map(|t| t.estimated_duration));

    let report = ValidationReport {
        valid: cycles.is_empty() && orphaned.is_empty(),
        cycles,
        orphaned,
        critical_path,
        critical_path_duration,
        total_estimated_time,
    };
    if report.valid {
        tracing::debug!(
            tasks = graph.len(),
            critical = report.critical_path_duration,
            "task graph valid"
        );
    } else {
        tracing::warn!(problems = ?report.problems(), "task graph invalid");
    }
    report
}

/// Strongly connected components that form a cycle: more than one member,
/// or a single task that depends on itself.
fn find_cycles(graph: &TaskGraph) -> Vec<Vec<TaskId>> {
    let g = graph.graph();
    let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(g)
        .into_iter()
        .filter(|scc| scc.len() > 1 || g.contains_edge(scc[0], scc[0]))
        .map(|mut scc| {
            scc.sort();
            scc
        })
        .collect();
    cycles.sort();
    cycles
        .into_iter()
        .map(|scc| scc.into_iter().map(|n| g[n].id.clone()).collect())
        .collect()
}

fn find_orphans(graph: &TaskGraph) -> Vec<OrphanedDependency> {
    graph
        .tasks()
        .flat_map(|task| {
            task.dependencies
                .iter()
                .filter(|dep| !graph.contains(dep))
                .map(move |dep| OrphanedDependency {
                    task: task.id.clone(),
                    missing: dep.clone(),
                })
        })
        .collect()
}

/// Longest duration-weighted path from a root to a leaf.
///
/// One pass in topological order: the best path ending at a task is its own
/// duration plus the best path ending at any of its dependencies. Ties keep
/// the dependency declared first, and among path ends the task inserted
/// first. Returns `None` if the graph has a cycle.
pub fn critical_path(graph: &TaskGraph) -> Option<(Vec<TaskId>, u64)> {
    let g = graph.graph();
    let order = toposort(g, None).ok()?;

    let n = g.node_count();
    let mut best = vec![0u64; n];
    let mut prev: Vec<Option<NodeIndex>> = vec![None; n];

    for node in order {
        let task = &g[node];
        let mut best_pred: Option<NodeIndex> = None;
        for dep in &task.dependencies {
            let Some(dep_index) = graph.node_index(dep) else {
                continue;
            };
            let better = match best_pred {
                None => true,
                Some(current) => best[dep_index.index()] > best[current.index()],
            };
            if better {
                best_pred = Some(dep_index);
            }
        }
        let base = best_pred.map(|p| best[p.index()]).unwrap_or(0);
        best[node.index()] = base.saturating_add(task.estimated_duration);
        prev[node.index()] = best_pred;
    }

    let mut end: Option<NodeIndex> = None;
    for node in g.node_indices() {
        let is_leaf = g.neighbors_directed(node, Direction::Outgoing).next().is_none();
        if !is_leaf {
            continue;
        }
        if end.map_or(true, |e| best[node.index()] > best[e.index()]) {
            end = Some(node);
        }
    }

    let Some(end) = end else {
        return Some((Vec::new(), 0));
    };
    let total = best[end.index()];
    let mut path = Vec::new();
    let mut cursor = Some(end);
    while let Some(node) = cursor {
        path.push(g[node].id.clone());
        cursor = prev[node.index()];
    }
    path.reverse();
    Some((path, total))
}

/// Sum of task durations, clamped at `u64::MAX` instead of overflowing.
pub fn total_duration(durations: impl IntoIterator<Item = u64>) -> u64 {
    durations
        .into_iter()
        .fold(0u64, |acc, secs| acc.saturating_add(secs))
}
