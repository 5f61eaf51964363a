//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Predefined task sets (chain, fan-out, diamond, independent)
//! - Deterministic generated graphs
//! - An orchestrator harness that collects events

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use conductor::core::{Task, TaskGraph, TaskId};
use conductor::orchestration::{
    Orchestrator, OrchestratorConfig, OrchestratorEvent, SimulatedRunner,
};

/// Create a task with the given dependencies and a 10s estimate.
pub fn test_task(id: &str, deps: &[&str]) -> Task {
    Task::new(id, &format!("Task {}", id))
        .with_dependencies(deps.iter().copied())
        .with_duration(10)
}

pub fn ids(list: &[&str]) -> Vec<TaskId> {
    list.iter().map(|s| TaskId::from(*s)).collect()
}

pub fn graph(tasks: Vec<Task>) -> TaskGraph {
    TaskGraph::from_tasks(tasks).expect("fixture graph should build")
}

/// A -> B -> C
pub fn chain_tasks() -> Vec<Task> {
    vec![
        test_task("A", &[]),
        test_task("B", &["A"]),
        test_task("C", &["B"]),
    ]
}

/// root -> (left, right) -> join
pub fn diamond_tasks() -> Vec<Task> {
    vec![
        test_task("root", &[]),
        test_task("left", &["root"]),
        test_task("right", &["root"]),
        test_task("join", &["left", "right"]),
    ]
}

pub fn independent_tasks(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| test_task(&format!("task-{}", i), &[]))
        .collect()
}

/// Small deterministic generator so generated graphs are reproducible.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound.max(1)
    }
}

/// Random acyclic graph: each task may depend on any earlier task.
pub fn random_dag(seed: u64, size: usize) -> Vec<Task> {
    let mut rng = Lcg::new(seed);
    (0..size)
        .map(|i| {
            let deps: Vec<String> = (0..i)
                .filter(|_| rng.below(4) == 0)
                .map(|j| format!("n{}", j))
                .collect();
            Task::new(format!("n{}", i), &format!("node {}", i))
                .with_dependencies(deps)
                .with_duration(1 + rng.below(50))
                .parallelizable(rng.below(5) != 0)
        })
        .collect()
}

/// Fisher-Yates shuffle driven by [`Lcg`].
pub fn shuffled<T>(mut items: Vec<T>, seed: u64) -> Vec<T> {
    let mut rng = Lcg::new(seed);
    for i in (1..items.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        items.swap(i, j);
    }
    items
}

/// Runner that finishes every task in a couple of milliseconds.
pub fn fast_runner() -> SimulatedRunner {
    SimulatedRunner::new(Duration::from_millis(1), 0.5)
}

/// Orchestrator wired to an event channel.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub event_rx: mpsc::Receiver<OrchestratorEvent>,
}

impl Harness {
    pub fn new(tasks: Vec<Task>, runner: SimulatedRunner, config: OrchestratorConfig) -> Self {
        let (tx, event_rx) = mpsc::channel(1024);
        let orchestrator =
            Orchestrator::new(graph(tasks), Arc::new(runner), config).with_events(tx);
        Self {
            orchestrator,
            event_rx,
        }
    }

    /// Drain whatever events are buffered.
    pub fn drain_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
