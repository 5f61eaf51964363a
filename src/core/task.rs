//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work handed to workers. Each task
//! carries its scheduling hints, its dependency list, and, once a worker
//! has run it, the result payload.

use crate::error::{Error, Result};
use crate::orchestration::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Identifier for a task, supplied by whoever decomposed the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Scheduling priority. Only ever used to order tasks that are already
/// ready at the same time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Classification of the work a task performs.
///
/// The kind decides which capabilities a worker is handed and how a phase
/// is named. It never influences ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Analysis,
    #[default]
    Modification,
    Process,
    Validation,
    Documentation,
}

impl TaskKind {
    /// Title-cased label used for phase names.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Analysis => "Analysis",
            TaskKind::Modification => "Modification",
            TaskKind::Process => "Process",
            TaskKind::Validation => "Validation",
            TaskKind::Documentation => "Documentation",
        }
    }

    /// Capability set a worker needs to carry out a task of this kind.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            TaskKind::Analysis => &["read", "search"],
            TaskKind::Modification => &["read", "write", "edit"],
            TaskKind::Process => &["execute"],
            TaskKind::Validation => &["read", "execute", "test"],
            TaskKind::Documentation => &["read", "write"],
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Analysis => write!(f, "analysis"),
            TaskKind::Modification => write!(f, "modification"),
            TaskKind::Process => write!(f, "process"),
            TaskKind::Validation => write!(f, "validation"),
            TaskKind::Documentation => write!(f, "documentation"),
        }
    }
}

/// Task status in its lifecycle.
///
/// Transitions only move forward: `Pending -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created and waiting for its phase.
    #[default]
    Pending,
    /// A worker has been spawned for the task.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed; the result payload describes why.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome payload recorded on a task once its worker finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub success: bool,
    pub summary: String,
    /// Opaque output produced by the task body.
    #[serde(default)]
    pub output: serde_json::Value,
    /// Failure description, set when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Artifacts the worker produced; merged across siblings by the coordinator.
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    pub fn failure(task_id: TaskId, worker_id: WorkerId, error: &str, elapsed: Duration) -> Self {
        Self {
            task_id,
            worker_id,
            success: false,
            summary: format!("failed: {}", error),
            output: serde_json::Value::Null,
            error: Some(error.to_string()),
            artifacts: Vec::new(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

fn default_parallelizable() -> bool {
    true
}

/// A single unit of work in the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Tasks that must complete before this one may start.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Estimated cost in seconds. Must be positive.
    pub estimated_duration: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default = "default_parallelizable")]
    pub parallelizable: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    /// Create a pending task with a one-second estimate and default hints.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            description: String::new(),
            dependencies: Vec::new(),
            estimated_duration: 1,
            priority: Priority::default(),
            kind: TaskKind::default(),
            parallelizable: true,
            status: TaskStatus::Pending,
            assigned_worker: None,
            result: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the dependency list. Repeated ids are collapsed, keeping the
    /// first occurrence.
    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        let mut seen = HashSet::new();
        self.dependencies = deps
            .into_iter()
            .map(Into::into)
            .filter(|id: &TaskId| seen.insert(id.clone()))
            .collect();
        self
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.estimated_duration = secs;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn parallelizable(mut self, parallelizable: bool) -> Self {
        self.parallelizable = parallelizable;
        self
    }

    pub fn estimated(&self) -> Duration {
        Duration::from_secs(self.estimated_duration)
    }

    /// Transition `Pending -> Running` and record the worker.
    pub fn start(&mut self, worker_id: WorkerId) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.assigned_worker = Some(worker_id);
        Ok(())
    }

    /// Transition `Running -> Completed` with the worker's result.
    pub fn complete(&mut self, result: TaskResult) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Transition `Running -> Failed` with a result describing the failure.
    pub fn fail(&mut self, result: TaskResult) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.result = Some(result);
        Ok(())
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        let legal = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        );
        if !legal {
            return Err(Error::InvalidTransition {
                task: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}
