//! Lifecycle notifications.

use crate::core::TaskId;
use crate::orchestration::WorkerId;
use tokio::sync::mpsc;

/// Events emitted while a plan executes.
///
/// Listeners subscribe with a channel; the set of events is fixed.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    PhaseStarted {
        index: usize,
        name: String,
        parallel: bool,
    },
    WorkerStarted {
        worker_id: WorkerId,
        task_id: TaskId,
    },
    ProgressUpdate {
        worker_id: WorkerId,
        progress: f64,
        step: String,
    },
    TaskCompleted {
        worker_id: WorkerId,
        task_id: TaskId,
    },
    TaskFailed {
        worker_id: WorkerId,
        task_id: TaskId,
        error: String,
    },
    PhaseCompleted {
        index: usize,
        completed: usize,
        failed: usize,
    },
}

/// Optional event sender shared by the pool and the orchestrator.
///
/// Uses `try_send`: a full or closed channel drops the event instead of
/// stalling execution.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<OrchestratorEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.tx {
            if let Err(err) = tx.try_send(event) {
                tracing::trace!("event dropped: {}", err);
            }
        }
    }
}
