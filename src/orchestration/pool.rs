//! Worker pool: spawns one worker per task and tracks it to completion.
//!
//! Each spawned worker gets a monitor task that runs the task body, relays
//! its progress into the worker record, and writes the final result into
//! the task graph. The monitor is the only writer of its worker record and
//! of its task's status and result.

use crate::core::{Task, TaskGraph, TaskId, TaskResult};
use crate::error::{Error, Result};
use crate::orchestration::coordinator::SharedContext;
use crate::orchestration::events::{EventSink, OrchestratorEvent};
use crate::orchestration::worker::{
    ProgressReporter, ProgressSnapshot, ProgressUpdate, TaskOutput, TaskRunner, Worker,
    WorkerContext, WorkerId, WorkerStatus,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Manages the lifecycle of workers.
///
/// # Example
///
/// ```ignore
/// let tasks = Arc::new(RwLock::new(graph));
/// let pool = WorkerPool::new(tasks.clone(), Arc::new(SimulatedRunner::default()));
///
/// let worker = pool.spawn_worker(&"t1".into(), context).await?;
/// pool.await_completion(&[worker]).await?;
/// ```
pub struct WorkerPool {
    tasks: Arc<RwLock<TaskGraph>>,
    workers: Arc<RwLock<HashMap<WorkerId, Worker>>>,
    /// Flips to `true` once the monitor has recorded its worker's outcome.
    completions: Mutex<HashMap<WorkerId, watch::Receiver<bool>>>,
    runner: Arc<dyn TaskRunner>,
    worker_timeout: Option<Duration>,
    cancel: CancellationToken,
    events: EventSink,
    spawned: AtomicUsize,
}

impl WorkerPool {
    pub fn new(tasks: Arc<RwLock<TaskGraph>>, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            tasks,
            workers: Arc::new(RwLock::new(HashMap::new())),
            completions: Mutex::new(HashMap::new()),
            runner,
            worker_timeout: None,
            cancel: CancellationToken::new(),
            events: EventSink::default(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Fail any worker that runs longer than `timeout`.
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Cancelling the token fails every in-flight worker.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Spawn a worker for a pending task.
    ///
    /// The task is `Running` with its worker assigned by the time this
    /// returns. The task body starts in the background.
    ///
    /// # Errors
    /// Fails if the task does not exist or is not pending.
    pub async fn spawn_worker(&self, task_id: &TaskId, context: WorkerContext) -> Result<WorkerId> {
        let worker_id = WorkerId::new();
        let task = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.require_mut(task_id)?;
            task.start(worker_id)?;
            task.clone()
        };

        let worker = Worker::new(worker_id, &task, context.clone());
        let (done, finished) = watch::channel(false);
        self.workers.write().await.insert(worker_id, worker);
        self.completions.lock().await.insert(worker_id, finished);
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.events.emit(OrchestratorEvent::WorkerStarted {
            worker_id,
            task_id: task_id.clone(),
        });
        tracing::debug!(worker = %worker_id.short(), task = %task_id, "worker spawned");

        let monitor = Monitor {
            worker_id,
            tasks: self.tasks.clone(),
            workers: self.workers.clone(),
            runner: self.runner.clone(),
            timeout: self.worker_timeout,
            cancel: self.cancel.clone(),
            events: self.events.clone(),
            done,
        };
        tokio::spawn(monitor.run(task, context));

        Ok(worker_id)
    }

    /// Current progress of a worker. Does not change any state.
    pub async fn poll_progress(&self, id: &WorkerId) -> Result<ProgressSnapshot> {
        let workers = self.workers.read().await;
        let worker = workers.get(id).ok_or(Error::WorkerNotFound { id: *id })?;
        Ok(worker.snapshot(Utc::now()))
    }

    /// Wait until every named worker's task is completed or failed.
    ///
    /// Works for a single worker or a whole phase, and any number of callers
    /// may wait on the same worker. Workers that already finished return
    /// immediately.
    pub async fn await_completion(&self, ids: &[WorkerId]) -> Result<()> {
        let receivers: Vec<(WorkerId, watch::Receiver<bool>)> = {
            let completions = self.completions.lock().await;
            ids.iter()
                .map(|id| {
                    completions
                        .get(id)
                        .map(|rx| (*id, rx.clone()))
                        .ok_or(Error::WorkerNotFound { id: *id })
                })
                .collect::<Result<_>>()?
        };
        self.wait_on(receivers).await;
        Ok(())
    }

    /// Wait for every worker this pool has spawned.
    pub async fn await_all(&self) {
        let receivers: Vec<(WorkerId, watch::Receiver<bool>)> = self
            .completions
            .lock()
            .await
            .iter()
            .map(|(id, rx)| (*id, rx.clone()))
            .collect();
        self.wait_on(receivers).await;
    }

    async fn wait_on(&self, receivers: Vec<(WorkerId, watch::Receiver<bool>)>) {
        let waited = futures::future::join_all(receivers.into_iter().map(|(id, mut rx)| async move {
            let finished = rx.wait_for(|done| *done).await.is_ok();
            (id, finished)
        }))
        .await;

        for (id, finished) in waited {
            if !finished {
                self.recover_lost_worker(id, "monitor exited without recording an outcome")
                    .await;
            }
        }
    }

    /// Mark a finished worker as terminated once its result is consumed.
    pub async fn terminate(&self, id: &WorkerId) -> Result<()> {
        let mut workers = self.workers.write().await;
        let worker = workers.get_mut(id).ok_or(Error::WorkerNotFound { id: *id })?;
        if !worker.status.is_finished() {
            return Err(Error::Validation(format!(
                "cannot terminate worker {} while {}",
                id.short(),
                worker.status
            )));
        }
        worker.status = WorkerStatus::Terminated;
        worker.last_update = Utc::now();
        Ok(())
    }

    /// Snapshot of a worker record.
    pub async fn worker(&self, id: &WorkerId) -> Option<Worker> {
        self.workers.read().await.get(id).cloned()
    }

    /// Result recorded on a task, if it has finished.
    pub async fn task_result(&self, id: &TaskId) -> Option<TaskResult> {
        self.tasks.read().await.get(id).and_then(|t| t.result.clone())
    }

    /// Publish a phase's merged artifacts into its workers' contexts.
    pub async fn publish_shared(&self, ids: &[WorkerId], shared: &SharedContext) {
        let mut workers = self.workers.write().await;
        for id in ids {
            if let Some(worker) = workers.get_mut(id) {
                worker.context.shared = Some(shared.clone());
            }
        }
    }

    /// Number of workers that have not finished yet.
    pub async fn active_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| !w.status.is_finished())
            .count()
    }

    /// Total number of workers spawned by this pool.
    pub fn workers_spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// A monitor died before recording an outcome; fail its task so nothing
    /// is left running. Safe to call more than once for the same worker.
    async fn recover_lost_worker(&self, id: WorkerId, reason: &str) {
        let task_id = match self.worker(&id).await {
            Some(worker) => worker.task_id,
            None => return,
        };
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            if !task.is_finished() {
                tracing::error!(worker = %id.short(), task = %task_id, "worker lost: {}", reason);
                let result = TaskResult::failure(task_id.clone(), id, reason, Duration::ZERO);
                if let Err(err) = task.fail(result) {
                    tracing::error!(task = %task_id, "could not record result: {}", err);
                }
            }
        }
        drop(tasks);
        if let Some(worker) = self.workers.write().await.get_mut(&id) {
            if !worker.status.is_finished() {
                worker.finish(false, Utc::now());
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("spawned", &self.workers_spawned())
            .field("worker_timeout", &self.worker_timeout)
            .finish()
    }
}

/// What woke the monitor loop.
enum Wake {
    Progress(bool),
    Finished(std::result::Result<std::result::Result<TaskOutput, String>, JoinError>),
    TimedOut,
    Cancelled,
}

/// Background task that owns one worker's execution.
struct Monitor {
    worker_id: WorkerId,
    tasks: Arc<RwLock<TaskGraph>>,
    workers: Arc<RwLock<HashMap<WorkerId, Worker>>>,
    runner: Arc<dyn TaskRunner>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    events: EventSink,
    done: watch::Sender<bool>,
}

impl Monitor {
    async fn run(self, task: Task, context: WorkerContext) {
        let started = Instant::now();
        let (reporter, mut progress_rx) = ProgressReporter::channel();

        if let Some(worker) = self.workers.write().await.get_mut(&self.worker_id) {
            worker.status = WorkerStatus::Running;
            worker.current_step = "starting".to_string();
        }

        // The body runs as its own task so a panic surfaces as a JoinError.
        let mut body = tokio::spawn(self.runner.run(task.clone(), context, reporter));
        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let mut relay_open = true;

        let outcome = loop {
            let wake = tokio::select! {
                joined = &mut body => Wake::Finished(joined),
                changed = progress_rx.changed(), if relay_open => Wake::Progress(changed.is_ok()),
                _ = &mut deadline => Wake::TimedOut,
                _ = self.cancel.cancelled() => Wake::Cancelled,
            };
            match wake {
                Wake::Progress(true) => {
                    let update = progress_rx.borrow_and_update().clone();
                    self.relay(&update.step, update.progress).await;
                }
                Wake::Progress(false) => relay_open = false,
                Wake::Finished(Ok(result)) => break result,
                Wake::Finished(Err(err)) => break Err(format!("task body panicked: {}", err)),
                Wake::TimedOut => {
                    body.abort();
                    break Err(format!(
                        "worker timed out after {:?}",
                        timeout.unwrap_or_default()
                    ));
                }
                Wake::Cancelled => {
                    body.abort();
                    break Err("cancelled before completion".to_string());
                }
            }
        };

        self.finish(&task, outcome, started.elapsed()).await;
        self.done.send_replace(true);
    }

    async fn relay(&self, step: &str, progress: f64) {
        let applied = {
            let mut workers = self.workers.write().await;
            match workers.get_mut(&self.worker_id) {
                Some(worker) => {
                    let update = ProgressUpdate {
                        progress,
                        step: step.to_string(),
                    };
                    worker.apply_progress(&update, Utc::now());
                    Some(worker.progress)
                }
                None => None,
            }
        };
        if let Some(progress) = applied {
            tracing::trace!(worker = %self.worker_id.short(), progress, step, "progress");
            self.events.emit(OrchestratorEvent::ProgressUpdate {
                worker_id: self.worker_id,
                progress,
                step: step.to_string(),
            });
        }
    }

    async fn finish(
        &self,
        task: &Task,
        outcome: std::result::Result<TaskOutput, String>,
        elapsed: Duration,
    ) {
        let result = match outcome {
            Ok(output) => TaskResult {
                task_id: task.id.clone(),
                worker_id: self.worker_id,
                success: true,
                summary: output.summary,
                output: output.data,
                error: None,
                artifacts: output.artifacts,
                elapsed_ms: elapsed.as_millis() as u64,
            },
            Err(error) => TaskResult::failure(task.id.clone(), self.worker_id, &error, elapsed),
        };
        let success = result.success;
        let error = result.error.clone();

        {
            let mut tasks = self.tasks.write().await;
            let recorded = tasks.require_mut(&task.id).and_then(|t| {
                if success {
                    t.complete(result)
                } else {
                    t.fail(result)
                }
            });
            if let Err(err) = recorded {
                // Already finalized elsewhere; that outcome stands.
                tracing::error!(task = %task.id, "could not record result: {}", err);
                return;
            }
        }

        if let Some(worker) = self.workers.write().await.get_mut(&self.worker_id) {
            worker.finish(success, Utc::now());
        }

        match error {
            None => {
                tracing::info!(task = %task.id, worker = %self.worker_id.short(), "task completed");
                self.events.emit(OrchestratorEvent::TaskCompleted {
                    worker_id: self.worker_id,
                    task_id: task.id.clone(),
                });
            }
            Some(error) => {
                tracing::warn!(task = %task.id, worker = %self.worker_id.short(), "task failed: {}", error);
                self.events.emit(OrchestratorEvent::TaskFailed {
                    worker_id: self.worker_id,
                    task_id: task.id.clone(),
                    error,
                });
            }
        }
    }
}
