//! Worker records and the task-body abstraction.
//!
//! A worker is bound to exactly one task for its lifetime. The work itself
//! is performed by a [`TaskRunner`]; the runner reports progress through a
//! [`ProgressReporter`] and never touches shared state directly.

use crate::core::{Task, TaskId, TaskKind};
use crate::orchestration::coordinator::SharedContext;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle: `Initializing -> Running -> Idle | Error -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Initializing,
    Running,
    /// Finished successfully, result not yet consumed.
    Idle,
    /// Finished with a failure.
    Error,
    /// Result consumed by the orchestrator.
    Terminated,
}

impl WorkerStatus {
    /// The worker's task has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Idle | WorkerStatus::Error | WorkerStatus::Terminated
        )
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Initializing => write!(f, "initializing"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Error => write!(f, "error"),
            WorkerStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Data a worker is started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub capabilities: Vec<String>,
    /// Artifacts merged from earlier phases.
    pub inherited: SharedContext,
    /// Artifacts of the worker's own phase, published after the phase barrier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<SharedContext>,
}

impl WorkerContext {
    pub fn for_task(task: &Task, inherited: SharedContext) -> Self {
        Self {
            task_id: task.id.clone(),
            kind: task.kind,
            capabilities: task.kind.capabilities().iter().map(|c| c.to_string()).collect(),
            inherited,
            shared: None,
        }
    }
}

/// Latest progress reported by a task body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub step: String,
}

/// Handed to a [`TaskRunner`] so it can report progress.
///
/// Backed by a `watch` channel: only the newest update matters, and a
/// runner never blocks on a slow reader.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: watch::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<ProgressUpdate>) {
        let (tx, rx) = watch::channel(ProgressUpdate::default());
        (Self { tx }, rx)
    }

    pub fn report(&self, progress: f64, step: &str) {
        let _ = self.tx.send(ProgressUpdate {
            progress,
            step: step.to_string(),
        });
    }
}

/// What a successful task body hands back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskOutput {
    pub summary: String,
    pub artifacts: Vec<String>,
    pub data: serde_json::Value,
}

/// The body of work a worker runs for a task.
///
/// Implementations stand in for whatever long-running job actually does the
/// work. An `Err` marks the task failed with that message.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(
        &self,
        task: Task,
        context: WorkerContext,
        progress: ProgressReporter,
    ) -> BoxFuture<'static, std::result::Result<TaskOutput, String>>;
}

/// Snapshot returned by [`crate::orchestration::WorkerPool::poll_progress`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: WorkerStatus,
    pub progress: f64,
    pub current_step: String,
    pub estimated_remaining: Duration,
    /// Projected finish time as of the poll.
    pub estimated_completion: DateTime<Utc>,
}

/// A worker bound to one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub task_id: TaskId,
    pub status: WorkerStatus,
    pub progress: f64,
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
    /// The task's estimate, used until progress gives a better projection.
    pub estimate: Duration,
    pub context: WorkerContext,
}

impl Worker {
    pub fn new(id: WorkerId, task: &Task, context: WorkerContext) -> Self {
        let now = Utc::now();
        let mut worker = Self {
            id,
            task_id: task.id.clone(),
            status: WorkerStatus::Initializing,
            progress: 0.0,
            current_step: "initializing".to_string(),
            started_at: now,
            last_update: now,
            estimated_completion: None,
            estimate: task.estimated(),
            context,
        };
        worker.refresh_estimate(now);
        worker
    }

    /// Apply a progress update. Progress never moves backwards and is
    /// clamped to `0.0..=1.0`.
    pub fn apply_progress(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        if self.status.is_finished() {
            return;
        }
        self.status = WorkerStatus::Running;
        let progress = if update.progress.is_nan() {
            0.0
        } else {
            update.progress.clamp(0.0, 1.0)
        };
        self.progress = self.progress.max(progress);
        if !update.step.is_empty() {
            self.current_step = update.step.clone();
        }
        self.last_update = now;
        self.refresh_estimate(now);
    }

    /// Record the terminal state of the worker's task.
    pub fn finish(&mut self, success: bool, now: DateTime<Utc>) {
        if success {
            self.status = WorkerStatus::Idle;
            self.progress = 1.0;
            self.current_step = "completed".to_string();
        } else {
            self.status = WorkerStatus::Error;
            self.current_step = "failed".to_string();
        }
        self.last_update = now;
        self.estimated_completion = Some(now);
    }

    /// Remaining time, projected from elapsed time and progress so far.
    /// Before any progress arrives the task's estimate is used.
    pub fn estimated_remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.status.is_finished() {
            return Duration::ZERO;
        }
        let elapsed = (now - self.started_at).to_std().unwrap_or_default();
        let projected = if self.progress > 0.0 {
            elapsed.div_f64(self.progress)
        } else {
            self.estimate
        };
        projected.saturating_sub(elapsed)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ProgressSnapshot {
        let remaining = self.estimated_remaining(now);
        ProgressSnapshot {
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            estimated_remaining: remaining,
            estimated_completion: now
                + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    fn refresh_estimate(&mut self, now: DateTime<Utc>) {
        let remaining = chrono::Duration::from_std(self.estimated_remaining(now))
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.estimated_completion = Some(now + remaining);
    }
}

/// Step labels reported by [`SimulatedRunner`] for each kind of task.
fn step_labels(kind: TaskKind) -> &'static [&'static str] {
    match kind {
        TaskKind::Analysis => &["scanning sources", "collecting findings", "summarizing"],
        TaskKind::Modification => &["reading targets", "applying changes", "reviewing diff"],
        TaskKind::Process => &["preparing", "executing", "collecting output"],
        TaskKind::Validation => &["building", "running checks", "reporting"],
        TaskKind::Documentation => &["outlining", "writing", "proofreading"],
    }
}

/// Timer-driven task body that advances progress by a fixed step each tick.
///
/// Used by the CLI and tests in place of real work. Tasks listed with
/// [`SimulatedRunner::failing`] fail half way through.
#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    tick: Duration,
    step: f64,
    failing: HashSet<TaskId>,
}

impl SimulatedRunner {
    pub fn new(tick: Duration, step: f64) -> Self {
        Self {
            tick,
            step: if step > 0.0 { step.min(1.0) } else { 1.0 },
            failing: HashSet::new(),
        }
    }

    /// Make the named tasks fail.
    pub fn failing<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.failing.extend(ids.into_iter().map(Into::into));
        self
    }
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 0.2)
    }
}

impl TaskRunner for SimulatedRunner {
    fn run(
        &self,
        task: Task,
        context: WorkerContext,
        progress: ProgressReporter,
    ) -> BoxFuture<'static, std::result::Result<TaskOutput, String>> {
        let tick = self.tick;
        let step = self.step;
        let fails = self.failing.contains(&task.id);

        async move {
            let labels = step_labels(task.kind);
            let mut done = 0.0_f64;
            while done < 1.0 {
                tokio::time::sleep(tick).await;
                done = (done + step).min(1.0);
                let label = ((done * labels.len() as f64) as usize).min(labels.len() - 1);
                progress.report(done, labels[label]);
                if fails && done >= 0.5 {
                    return Err(format!("{} failed during {}", task.id, labels[label]));
                }
            }
            Ok(TaskOutput {
                summary: format!("{} ({}) finished", task.title, task.kind),
                artifacts: vec![format!("{}.{}", task.id, task.kind)],
                data: serde_json::json!({
                    "capabilities": context.capabilities,
                    "inherited_artifacts": context.inherited.len(),
                }),
            })
        }
        .boxed()
    }
}
