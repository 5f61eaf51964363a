//! Executing plans with the simulated runner.

use std::sync::Arc;
use std::time::Duration;

use conductor::core::{TaskStatus, TaskKind};
use conductor::orchestration::{
    AbortReason, ExecutionOutcome, OrchestratorConfig, OrchestratorEvent, PhaseStatus,
    SharedContext, SimulatedRunner, Strategy, WorkerContext, WorkerPool, WorkerStatus,
};
use tokio::sync::RwLock;

use crate::fixtures::{
    diamond_tasks, fast_runner, graph, ids, independent_tasks, test_task, Harness,
};

/// Test: Diamond runs to completion
/// Given root -> (left, right) -> join
/// When run with the adaptive strategy
/// Then every task completes and every artifact is merged
#[tokio::test]
async fn test_diamond_runs_to_completion() {
    let mut harness = Harness::new(diamond_tasks(), fast_runner(), OrchestratorConfig::default());
    let result = harness.orchestrator.run(Strategy::Adaptive).await.unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::Succeeded);
    assert_eq!(result.phases_total, 3);
    assert_eq!(result.phases_completed, 3);
    assert_eq!(result.tasks_total, 4);
    assert_eq!(result.tasks_completed, 4);
    assert_eq!(result.workers_spawned, 4);
    assert_eq!(result.results.len(), 4);
    for name in ["root", "left", "right", "join"] {
        assert!(
            result.shared_artifacts.contains(&format!("{}.modification", name)),
            "missing artifact for {}",
            name
        );
    }
}

/// Test: Parallel phase failure with stop-on-error
/// Given a parallel phase where one worker fails
/// When continue-on-error is off
/// Then the phase is incomplete, the failure is recorded, and no later phase starts
#[tokio::test]
async fn test_parallel_failure_halts_execution() {
    let tasks = vec![
        test_task("setup", &[]),
        test_task("good", &["setup"]),
        test_task("broken", &["setup"]),
        test_task("publish", &["good", "broken"]),
    ];
    let mut harness = Harness::new(
        tasks,
        fast_runner().failing(["broken"]),
        OrchestratorConfig::default(),
    );
    let result = harness.orchestrator.run(Strategy::Parallel).await.unwrap();

    assert!(matches!(
        result.outcome,
        ExecutionOutcome::Aborted {
            reason: AbortReason::PhaseFailed { phase: 1, .. }
        }
    ));
    assert_eq!(result.phase_reports[1].status, PhaseStatus::Incomplete);
    assert_eq!(result.phase_reports[2].status, PhaseStatus::NotStarted);
    assert_eq!(result.failed, ids(&["broken"]));
    assert_eq!(result.not_started, ids(&["publish"]));

    let broken = result.result(&"broken".into()).unwrap();
    assert!(!broken.success);
    assert!(broken.error.as_deref().unwrap_or("").contains("broken failed"));

    let publish = harness.orchestrator.task(&"publish".into()).await.unwrap();
    assert_eq!(publish.status, TaskStatus::Pending);
    assert!(publish.assigned_worker.is_none());

    let started_phases: Vec<usize> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            OrchestratorEvent::PhaseStarted { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(started_phases, vec![0, 1]);
}

/// Test: Continue-on-error keeps independent work going
/// Given two branches where one fails early
/// When continue-on-error is on
/// Then the healthy branch finishes and the failed branch's dependents are skipped
#[tokio::test]
async fn test_continue_on_error_runs_healthy_branch() {
    let tasks = vec![
        test_task("a1", &[]),
        test_task("b1", &[]),
        test_task("a2", &["a1"]),
        test_task("b2", &["b1"]),
        test_task("b3", &["b2"]),
    ];
    let config = OrchestratorConfig {
        continue_on_error: true,
        ..Default::default()
    };
    let mut harness = Harness::new(tasks, fast_runner().failing(["b1"]), config);
    let result = harness.orchestrator.run(Strategy::Parallel).await.unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::PartiallySucceeded);
    assert_eq!(result.failed, ids(&["b1"]));
    assert_eq!(result.skipped, ids(&["b2", "b3"]));
    assert_eq!(result.tasks_completed, 2);
    assert_eq!(result.phases_completed, 3);
    assert!(result.shared_artifacts.contains("a2.modification"));
    assert!(!result.shared_artifacts.contains("b1.modification"));
}

/// Test: Global timeout stops execution
/// Given slow tasks and a short global timeout
/// When run
/// Then in-flight work is failed, later phases never start, and the outcome is timed out
#[tokio::test]
async fn test_global_timeout() {
    let slow = SimulatedRunner::new(Duration::from_millis(40), 0.1);
    let config = OrchestratorConfig {
        global_timeout: Some(Duration::from_millis(60)),
        ..Default::default()
    };
    let tasks = vec![
        test_task("p1", &[]),
        test_task("p2", &[]),
        test_task("next", &["p1", "p2"]),
    ];
    let mut harness = Harness::new(tasks, slow, config);
    let result = harness.orchestrator.run(Strategy::Parallel).await.unwrap();

    assert!(matches!(
        result.outcome,
        ExecutionOutcome::Aborted {
            reason: AbortReason::TimedOut { .. }
        }
    ));
    assert_eq!(result.phases_completed, 0);
    assert_eq!(result.failed, ids(&["p1", "p2"]));
    assert_eq!(result.not_started, ids(&["next"]));
    assert!(result.elapsed_ms < 2_000);
    for result in &result.results {
        assert!(result.error.as_deref().unwrap_or("").contains("cancelled"));
    }
}

/// Test: Global timeout wins over continue-on-error
/// Given slow tasks, continue_on_error, and a short global timeout
/// When run
/// Then the run is reported as timed out, not as a partial success
#[tokio::test]
async fn test_global_timeout_with_continue_on_error() {
    let slow = SimulatedRunner::new(Duration::from_millis(40), 0.1);
    let config = OrchestratorConfig {
        continue_on_error: true,
        global_timeout: Some(Duration::from_millis(60)),
        ..Default::default()
    };
    let tasks = vec![
        test_task("p1", &[]),
        test_task("p2", &[]),
        test_task("next", &["p1", "p2"]),
    ];
    let mut harness = Harness::new(tasks, slow, config);
    let result = harness.orchestrator.run(Strategy::Parallel).await.unwrap();

    assert!(matches!(
        result.outcome,
        ExecutionOutcome::Aborted {
            reason: AbortReason::TimedOut { .. }
        }
    ));
    assert_eq!(result.phases_completed, 0);
    assert_eq!(result.phase_reports[0].status, PhaseStatus::Incomplete);
    assert_eq!(result.failed, ids(&["p1", "p2"]));
    assert_eq!(result.not_started, ids(&["next"]));
    assert!(result.skipped.is_empty());
}

/// Test: Per-worker timeout fails only the slow task
#[tokio::test]
async fn test_worker_timeout_fails_task() {
    let slow = SimulatedRunner::new(Duration::from_millis(200), 0.5);
    let config = OrchestratorConfig {
        continue_on_error: true,
        worker_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let mut harness = Harness::new(vec![test_task("slow", &[])], slow, config);
    let result = harness.orchestrator.run(Strategy::Sequential).await.unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::PartiallySucceeded);
    let slow = result.result(&"slow".into()).unwrap();
    assert!(slow.error.as_deref().unwrap_or("").contains("timed out"));
}

/// Test: Sequential phases run one task at a time
#[tokio::test]
async fn test_sequential_runs_one_at_a_time() {
    let mut harness = Harness::new(
        independent_tasks(4),
        fast_runner(),
        OrchestratorConfig::default(),
    );
    harness.orchestrator.run(Strategy::Sequential).await.unwrap();

    let mut running = 0usize;
    let mut peak = 0usize;
    for event in harness.drain_events() {
        match event {
            OrchestratorEvent::WorkerStarted { .. } => {
                running += 1;
                peak = peak.max(running);
            }
            OrchestratorEvent::TaskCompleted { .. } | OrchestratorEvent::TaskFailed { .. } => {
                running -= 1;
            }
            _ => {}
        }
    }
    assert_eq!(peak, 1);
}

/// Test: Parallel phases overlap their workers
#[tokio::test]
async fn test_parallel_workers_overlap() {
    let runner = SimulatedRunner::new(Duration::from_millis(10), 0.25);
    let mut harness = Harness::new(independent_tasks(4), runner, OrchestratorConfig::default());
    harness.orchestrator.run(Strategy::Parallel).await.unwrap();

    let events = harness.drain_events();
    let first_finish = events
        .iter()
        .position(|e| matches!(e, OrchestratorEvent::TaskCompleted { .. }))
        .unwrap();
    let started_before = events[..first_finish]
        .iter()
        .filter(|e| matches!(e, OrchestratorEvent::WorkerStarted { .. }))
        .count();
    assert_eq!(started_before, 4);
}

/// Test: Progress is visible while a worker runs and final once it stops
#[tokio::test]
async fn test_poll_progress_through_pool() {
    let tasks = Arc::new(RwLock::new(graph(vec![
        test_task("analyze", &[]).with_kind(TaskKind::Analysis),
    ])));
    let runner = SimulatedRunner::new(Duration::from_millis(15), 0.25);
    let pool = WorkerPool::new(tasks.clone(), Arc::new(runner));

    let context = {
        let graph = tasks.read().await;
        WorkerContext::for_task(graph.get(&"analyze".into()).unwrap(), SharedContext::default())
    };
    let worker = pool.spawn_worker(&"analyze".into(), context).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..200 {
        let snapshot = pool.poll_progress(&worker).await.unwrap();
        if snapshot.status.is_finished() {
            break;
        }
        seen.push(snapshot.progress);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
    assert!(seen.iter().any(|p| *p > 0.0 && *p < 1.0));

    pool.await_completion(&[worker]).await.unwrap();
    let snapshot = pool.poll_progress(&worker).await.unwrap();
    assert_eq!(snapshot.status, WorkerStatus::Idle);
    assert_eq!(snapshot.progress, 1.0);
    assert_eq!(snapshot.current_step, "completed");
}

/// Test: Artifacts from earlier phases reach later workers
#[tokio::test]
async fn test_context_flows_between_phases() {
    let mut harness = Harness::new(diamond_tasks(), fast_runner(), OrchestratorConfig::default());
    harness.orchestrator.run(Strategy::Parallel).await.unwrap();

    let join = harness.orchestrator.task(&"join".into()).await.unwrap();
    let output = join.result.unwrap().output;
    // root, left and right were merged before join started
    assert_eq!(output["inherited_artifacts"], 3);
}

/// Test: Invalid graphs never start a worker
#[tokio::test]
async fn test_invalid_graph_rejected_before_work() {
    let mut harness = Harness::new(
        vec![test_task("X", &["Y"]), test_task("ok", &[])],
        fast_runner(),
        OrchestratorConfig::default(),
    );
    let err = harness.orchestrator.run(Strategy::Parallel).await.unwrap_err();

    match err {
        conductor::Error::Graph(report) => {
            assert_eq!(report.offending_tasks(), ids(&["X"]));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.orchestrator.pool().workers_spawned(), 0);
    assert!(harness.drain_events().is_empty());
}
