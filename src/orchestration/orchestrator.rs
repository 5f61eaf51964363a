//! Orchestration driver: validate, plan, then run phases in order.
//!
//! Phases are strict barriers. Within a phase, parallelizable tasks run as a
//! concurrent batch and everything else runs one at a time afterwards. A
//! task whose dependencies did not complete is never started.

use crate::core::{validate, Task, TaskGraph, TaskId, TaskResult, TaskStatus, ValidationReport};
use crate::error::{Error, Result};
use crate::orchestration::coordinator::{Coordinator, SharedContext};
use crate::orchestration::events::{EventSink, OrchestratorEvent};
use crate::orchestration::planner::{create_execution_plan, ExecutionPlan, Phase, Strategy};
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::worker::{TaskRunner, WorkerContext, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrchestratorConfig {
    /// Keep going after a task fails. Dependents of the failed task are
    /// skipped either way.
    pub continue_on_error: bool,
    /// Upper bound on the whole execution.
    pub global_timeout: Option<Duration>,
    /// Upper bound on any single worker.
    pub worker_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    CompletedWithFailures,
    /// Stopped early: a failure under stop-on-error, a timeout, or a cancel.
    Incomplete,
    NotStarted,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::CompletedWithFailures => write!(f, "completed with failures"),
            PhaseStatus::Incomplete => write!(f, "incomplete"),
            PhaseStatus::NotStarted => write!(f, "not started"),
        }
    }
}

/// What happened to each task of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub index: usize,
    pub name: String,
    pub parallel: bool,
    pub status: PhaseStatus,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Not started because a dependency did not complete.
    pub skipped: Vec<TaskId>,
    /// Not started because execution stopped first.
    pub not_started: Vec<TaskId>,
    pub elapsed_ms: u64,
}

impl PhaseReport {
    fn pending(phase: &Phase) -> Self {
        Self {
            index: phase.index,
            name: phase.name.clone(),
            parallel: phase.parallel,
            status: PhaseStatus::NotStarted,
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            not_started: Vec::new(),
            elapsed_ms: 0,
        }
    }

    fn not_started(phase: &Phase) -> Self {
        let mut report = Self::pending(phase);
        report.not_started = phase.tasks.clone();
        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// A task failed and `continue_on_error` was off.
    PhaseFailed { phase: usize, failed: Vec<TaskId> },
    TimedOut { after_ms: u64 },
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::PhaseFailed { phase, failed } => {
                let names: Vec<&str> = failed.iter().map(TaskId::as_str).collect();
                write!(f, "phase {} failed: {}", phase, names.join(", "))
            }
            AbortReason::TimedOut { after_ms } => write!(f, "timed out after {}ms", after_ms),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    /// Every phase ran but some tasks failed or were skipped.
    PartiallySucceeded,
    Aborted { reason: AbortReason },
}

/// Structured outcome of running a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub phases_total: usize,
    pub phases_completed: usize,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub workers_spawned: usize,
    pub elapsed_ms: u64,
    /// Results of every task that ran, successful or not, in plan order.
    pub results: Vec<TaskResult>,
    pub failed: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    pub not_started: Vec<TaskId>,
    pub phase_reports: Vec<PhaseReport>,
    pub shared_artifacts: SharedContext,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Succeeded
    }

    pub fn result(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.task_id == id)
    }
}

/// Owns the task store, the worker pool, and the coordinator for one run.
///
/// # Example
///
/// ```ignore
/// let graph = TaskGraph::from_tasks(tasks)?;
/// let mut orchestrator = Orchestrator::new(
///     graph,
///     Arc::new(SimulatedRunner::default()),
///     OrchestratorConfig::default(),
/// );
/// let result = orchestrator.run(Strategy::Adaptive).await?;
/// ```
pub struct Orchestrator {
    tasks: Arc<RwLock<TaskGraph>>,
    pool: WorkerPool,
    coordinator: Coordinator,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(graph: TaskGraph, runner: Arc<dyn TaskRunner>, config: OrchestratorConfig) -> Self {
        let tasks = Arc::new(RwLock::new(graph));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(tasks.clone(), runner)
            .with_worker_timeout(config.worker_timeout)
            .with_cancellation(cancel.clone());
        Self {
            tasks,
            pool,
            coordinator: Coordinator::new(),
            config,
            cancel,
            events: EventSink::default(),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn with_events(mut self, tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        let sink = EventSink::new(tx);
        self.pool = self.pool.with_events(sink.clone());
        self.events = sink;
        self
    }

    /// Shared task store; read it to inspect statuses and results.
    pub fn tasks(&self) -> Arc<RwLock<TaskGraph>> {
        self.tasks.clone()
    }

    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Cancelling this token stops execution like a global timeout does.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn validate(&self) -> ValidationReport {
        validate(&*self.tasks.read().await)
    }

    /// Validate the graph and plan it.
    ///
    /// # Errors
    /// [`Error::Graph`] when validation fails; nothing is planned then.
    pub async fn plan(&self, strategy: Strategy) -> Result<ExecutionPlan> {
        let graph = self.tasks.read().await;
        validate(&graph).into_result()?;
        create_execution_plan(&graph, strategy)
    }

    /// Validate, plan and execute.
    pub async fn run(&mut self, strategy: Strategy) -> Result<ExecutionResult> {
        let plan = self.plan(strategy).await?;
        self.execute(&plan).await
    }

    /// Run a plan phase by phase.
    ///
    /// Task failures, timeouts and cancellation are reported in the returned
    /// [`ExecutionResult`].
    ///
    /// # Errors
    /// Only when the plan does not fit the task store: an unknown task, a
    /// task listed twice, or a task that is no longer pending.
    pub async fn execute(&mut self, plan: &ExecutionPlan) -> Result<ExecutionResult> {
        self.check_plan(plan).await?;
        let started = Instant::now();
        tracing::info!(
            strategy = %plan.strategy,
            phases = plan.phases.len(),
            tasks = plan.task_count(),
            "execution started"
        );

        let timer = self.config.global_timeout.map(|limit| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!("global timeout of {:?} reached, cancelling", limit);
                cancel.cancel();
            })
        });

        let outcome = self.run_phases(plan, started).await;
        if let Some(timer) = timer {
            timer.abort();
        }
        let (reports, abort) = match outcome {
            Ok(done) => done,
            Err(err) => {
                tracing::error!("execution stopped: {}", err);
                self.pool.await_all().await;
                return Err(err);
            }
        };

        let result = self.summarize(plan, reports, abort, started).await;
        match &result.outcome {
            ExecutionOutcome::Aborted { reason } => {
                tracing::warn!(reason = %reason, "execution aborted")
            }
            _ => tracing::info!(
                completed = result.tasks_completed,
                failed = result.tasks_failed,
                elapsed_ms = result.elapsed_ms,
                "execution finished"
            ),
        }
        Ok(result)
    }

    async fn run_phases(
        &mut self,
        plan: &ExecutionPlan,
        started: Instant,
    ) -> Result<(Vec<PhaseReport>, Option<AbortReason>)> {
        let mut reports = Vec::with_capacity(plan.phases.len());
        let mut abort: Option<AbortReason> = None;

        for phase in &plan.phases {
            if abort.is_some() {
                reports.push(PhaseReport::not_started(phase));
                continue;
            }
            if self.cancel.is_cancelled() {
                abort = Some(self.stop_reason(started));
                reports.push(PhaseReport::not_started(phase));
                continue;
            }

            self.events.emit(OrchestratorEvent::PhaseStarted {
                index: phase.index,
                name: phase.name.clone(),
                parallel: phase.parallel,
            });
            tracing::info!(
                phase = phase.index,
                name = %phase.name,
                parallel = phase.parallel,
                tasks = phase.tasks.len(),
                "phase started"
            );

            let report = self.run_phase(phase).await?;

            self.events.emit(OrchestratorEvent::PhaseCompleted {
                index: phase.index,
                completed: report.completed.len(),
                failed: report.failed.len(),
            });
            tracing::info!(
                phase = phase.index,
                status = %report.status,
                completed = report.completed.len(),
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "phase finished"
            );

            if report.status == PhaseStatus::Incomplete {
                abort = Some(if self.cancel.is_cancelled() {
                    self.stop_reason(started)
                } else {
                    AbortReason::PhaseFailed {
                        phase: phase.index,
                        failed: report.failed.clone(),
                    }
                });
            }
            reports.push(report);
        }
        Ok((reports, abort))
    }

    async fn check_plan(&self, plan: &ExecutionPlan) -> Result<()> {
        let graph = self.tasks.read().await;
        let mut seen = HashSet::new();
        for id in plan.task_ids() {
            let task = graph.get(id).ok_or_else(|| Error::TaskNotFound(id.clone()))?;
            if !seen.insert(id) {
                return Err(Error::Validation(format!("task {} appears twice in the plan", id)));
            }
            if task.status != TaskStatus::Pending {
                return Err(Error::Validation(format!(
                    "task {} is {}, expected pending",
                    id, task.status
                )));
            }
        }
        Ok(())
    }

    async fn run_phase(&mut self, phase: &Phase) -> Result<PhaseReport> {
        let started = Instant::now();
        let mut report = PhaseReport::pending(phase);

        let mut concurrent = Vec::new();
        let mut exclusive = Vec::new();
        {
            let graph = self.tasks.read().await;
            for id in &phase.tasks {
                let task = graph.get(id).ok_or_else(|| Error::TaskNotFound(id.clone()))?;
                let blocked = task.dependencies.iter().any(|dep| {
                    graph
                        .get(dep)
                        .map_or(true, |d| d.status != TaskStatus::Completed)
                });
                if blocked {
                    tracing::debug!(task = %id, "skipped: a dependency did not complete");
                    report.skipped.push(id.clone());
                } else if phase.parallel && task.parallelizable {
                    concurrent.push(id.clone());
                } else {
                    exclusive.push(id.clone());
                }
            }
        }

        let mut workers: Vec<(TaskId, WorkerId)> = Vec::new();
        let mut halted = false;

        if !concurrent.is_empty() {
            let inherited = self.coordinator.merged().clone();
            let mut batch = Vec::with_capacity(concurrent.len());
            for id in concurrent {
                if self.cancel.is_cancelled() {
                    report.not_started.push(id);
                    continue;
                }
                let worker = self.spawn(&id, inherited.clone()).await?;
                batch.push(worker);
                workers.push((id, worker));
            }
            self.pool.await_completion(&batch).await?;
            // Siblings always finish; only later work is held back.
            halted = !self.config.continue_on_error && self.any_failed(&workers).await;
        }

        for id in exclusive {
            if halted || self.cancel.is_cancelled() {
                report.not_started.push(id);
                continue;
            }
            let worker = self.spawn(&id, self.coordinator.merged().clone()).await?;
            self.pool.await_completion(&[worker]).await?;
            workers.push((id.clone(), worker));
            match self.pool.task_result(&id).await {
                Some(result) if result.success => {
                    if !phase.parallel {
                        self.coordinator.absorb(&result);
                    }
                }
                _ => halted = !self.config.continue_on_error,
            }
        }

        if phase.parallel {
            let ids: Vec<WorkerId> = workers.iter().map(|(_, w)| *w).collect();
            self.coordinator.coordinate(&self.pool, &ids).await?;
        }

        {
            let graph = self.tasks.read().await;
            for (id, _) in &workers {
                match graph.get(id).map(|t| t.status) {
                    Some(TaskStatus::Completed) => report.completed.push(id.clone()),
                    _ => report.failed.push(id.clone()),
                }
            }
        }
        for (_, worker) in &workers {
            self.pool.terminate(worker).await?;
        }

        // A cancel that cut work short stops the run whatever the policy.
        let interrupted = self.cancel.is_cancelled() && !report.failed.is_empty();
        let stopped_early = interrupted
            || !report.not_started.is_empty()
            || (!report.failed.is_empty() && !self.config.continue_on_error);
        report.status = if stopped_early {
            PhaseStatus::Incomplete
        } else if report.failed.is_empty() && report.skipped.is_empty() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::CompletedWithFailures
        };
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn spawn(&self, id: &TaskId, inherited: SharedContext) -> Result<WorkerId> {
        let context = {
            let graph = self.tasks.read().await;
            let task = graph.get(id).ok_or_else(|| Error::TaskNotFound(id.clone()))?;
            WorkerContext::for_task(task, inherited)
        };
        self.pool.spawn_worker(id, context).await
    }

    async fn any_failed(&self, workers: &[(TaskId, WorkerId)]) -> bool {
        let graph = self.tasks.read().await;
        workers
            .iter()
            .any(|(id, _)| graph.get(id).map_or(true, |t| t.status != TaskStatus::Completed))
    }

    fn stop_reason(&self, started: Instant) -> AbortReason {
        let elapsed = started.elapsed();
        match self.config.global_timeout {
            Some(limit) if elapsed >= limit => AbortReason::TimedOut {
                after_ms: elapsed.as_millis() as u64,
            },
            _ => AbortReason::Cancelled,
        }
    }

    async fn summarize(
        &self,
        plan: &ExecutionPlan,
        phase_reports: Vec<PhaseReport>,
        abort: Option<AbortReason>,
        started: Instant,
    ) -> ExecutionResult {
        let graph = self.tasks.read().await;
        let results: Vec<TaskResult> = plan
            .task_ids()
            .filter_map(|id| graph.get(id).and_then(|t| t.result.clone()))
            .collect();
        drop(graph);

        let failed: Vec<TaskId> = phase_reports.iter().flat_map(|r| r.failed.clone()).collect();
        let skipped: Vec<TaskId> = phase_reports.iter().flat_map(|r| r.skipped.clone()).collect();
        let not_started: Vec<TaskId> = phase_reports
            .iter()
            .flat_map(|r| r.not_started.clone())
            .collect();

        let outcome = match abort {
            Some(reason) => ExecutionOutcome::Aborted { reason },
            None if failed.is_empty() && skipped.is_empty() => ExecutionOutcome::Succeeded,
            None => ExecutionOutcome::PartiallySucceeded,
        };

        ExecutionResult {
            outcome,
            phases_total: plan.phases.len(),
            phases_completed: phase_reports
                .iter()
                .filter(|r| {
                    matches!(
                        r.status,
                        PhaseStatus::Completed | PhaseStatus::CompletedWithFailures
                    )
                })
                .count(),
            tasks_total: plan.task_count(),
            tasks_completed: results.iter().filter(|r| r.success).count(),
            tasks_failed: failed.len(),
            workers_spawned: self.pool.workers_spawned(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            results,
            failed,
            skipped,
            not_started,
            phase_reports,
            shared_artifacts: self.coordinator.merged().clone(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}
