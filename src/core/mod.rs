//! Core domain models for conductor.
//!
//! Tasks, the owned task graph, and graph validation. Everything in here is
//! synchronous; the orchestration layer builds on top of it.

pub mod graph;
pub mod task;
pub mod validate;

pub use graph::TaskGraph;
pub use task::{Priority, Task, TaskId, TaskKind, TaskResult, TaskStatus};
pub use validate::{critical_path, total_duration, validate, OrphanedDependency, ValidationReport};
