//! Orchestration layer for conductor.
//!
//! Turns a validated task graph into an execution plan and drives it:
//! the planner builds phases, the worker pool runs one worker per task,
//! the coordinator merges artifacts at phase barriers, and the
//! orchestrator ties them together.

pub mod coordinator;
pub mod events;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod worker;

pub use coordinator::{Coordinator, SharedContext};
pub use events::OrchestratorEvent;
pub use orchestrator::{
    AbortReason, ExecutionOutcome, ExecutionResult, Orchestrator, OrchestratorConfig,
    PhaseReport, PhaseStatus,
};
pub use planner::{create_execution_plan, ExecutionPlan, Phase, Strategy};
pub use pool::WorkerPool;
pub use worker::{
    ProgressReporter, ProgressSnapshot, ProgressUpdate, SimulatedRunner, TaskOutput, TaskRunner,
    Worker, WorkerContext, WorkerId, WorkerStatus,
};
