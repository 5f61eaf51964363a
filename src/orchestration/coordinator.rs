//! Cross-worker artifact merging.
//!
//! The coordinator runs only after a phase barrier, when every worker of
//! the phase has reached a terminal state, so it never races an in-flight
//! worker.

use crate::core::{TaskId, TaskResult};
use crate::error::{Error, Result};
use crate::orchestration::{WorkerId, WorkerPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Union of artifacts produced by a set of workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedContext {
    /// Artifact name mapped to the tasks that produced it.
    pub artifacts: BTreeMap<String, Vec<TaskId>>,
}

impl SharedContext {
    pub fn insert(&mut self, artifact: &str, producer: &TaskId) {
        let producers = self.artifacts.entry(artifact.to_string()).or_default();
        if !producers.contains(producer) {
            producers.push(producer.clone());
        }
    }

    pub fn merge(&mut self, other: &SharedContext) {
        for (artifact, producers) in &other.artifacts {
            for producer in producers {
                self.insert(artifact, producer);
            }
        }
    }

    pub fn contains(&self, artifact: &str) -> bool {
        self.artifacts.contains_key(artifact)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    fn add_result(&mut self, result: &TaskResult) {
        if !result.success {
            return;
        }
        for artifact in &result.artifacts {
            self.insert(artifact, &result.task_id);
        }
    }
}

/// Merges worker artifacts and keeps the running union for later phases.
#[derive(Debug, Default)]
pub struct Coordinator {
    merged: SharedContext,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the artifacts of a finished parallel phase.
    ///
    /// Collects each worker's successful result, publishes the union into
    /// every worker's context, folds it into the running set, and returns
    /// the phase's union.
    ///
    /// # Errors
    /// Fails if a worker is unknown or has not finished yet.
    pub async fn coordinate(
        &mut self,
        pool: &WorkerPool,
        worker_ids: &[WorkerId],
    ) -> Result<SharedContext> {
        let mut phase = SharedContext::default();
        for id in worker_ids {
            let worker = pool
                .worker(id)
                .await
                .ok_or(Error::WorkerNotFound { id: *id })?;
            if !worker.status.is_finished() {
                return Err(Error::Validation(format!(
                    "worker {} is still {}",
                    id.short(),
                    worker.status
                )));
            }
            if let Some(result) = pool.task_result(&worker.task_id).await {
                phase.add_result(&result);
            }
        }

        pool.publish_shared(worker_ids, &phase).await;
        self.merged.merge(&phase);
        tracing::debug!(
            workers = worker_ids.len(),
            artifacts = phase.len(),
            total = self.merged.len(),
            "phase artifacts merged"
        );
        Ok(phase)
    }

    /// Fold a single task's result into the running set.
    pub fn absorb(&mut self, result: &TaskResult) {
        self.merged.add_result(result);
    }

    /// Everything merged so far; seed context for the next phase.
    pub fn merged(&self) -> &SharedContext {
        &self.merged
    }
}
