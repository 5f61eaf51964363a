//! Validation and planning of the reference scenarios.

use conductor::core::{validate, Priority, TaskKind};
use conductor::orchestration::{create_execution_plan, Strategy};
use conductor::Error;

use crate::fixtures::{chain_tasks, diamond_tasks, graph, ids, independent_tasks, test_task};

/// Test: Fan-out plans into two phases
/// Given T1 and two tasks that depend only on it
/// When planned with the parallel strategy
/// Then phase 1 holds T1 and phase 2 holds T2 and T3, marked parallel
#[test]
fn test_fan_out_plan() {
    let g = graph(vec![
        test_task("T1", &[]),
        test_task("T2", &["T1"]),
        test_task("T3", &["T1"]),
    ]);
    let plan = create_execution_plan(&g, Strategy::Parallel).unwrap();

    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[0].tasks, ids(&["T1"]));
    assert_eq!(plan.phases[1].tasks, ids(&["T2", "T3"]));
    assert!(plan.phases[1].parallel);
}

/// Test: Two-task cycle
/// Given A depends on B and B depends on A
/// When validated
/// Then the graph is invalid and one cycle names both tasks
#[test]
fn test_cycle_reported() {
    let g = graph(vec![test_task("A", &["B"]), test_task("B", &["A"])]);
    let report = validate(&g);

    assert!(!report.valid);
    assert_eq!(report.cycles.len(), 1);
    assert!(report.cycles[0].contains(&"A".into()));
    assert!(report.cycles[0].contains(&"B".into()));
    assert!(report.problems()[0].starts_with("Circular dependency detected"));
}

/// Test: Orphaned dependency
/// Given X depends on Y and Y is absent
/// When validated
/// Then an orphan naming X and Y is reported
#[test]
fn test_orphaned_dependency_reported() {
    let g = graph(vec![test_task("X", &["Y"])]);
    let report = validate(&g);

    assert!(!report.valid);
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].task, "X".into());
    assert_eq!(report.orphaned[0].missing, "Y".into());
    assert_eq!(report.problems(), vec!["X depends on missing task: Y"]);
}

/// Test: Chain critical path
/// Given A -> B -> C at 100s each
/// When validated
/// Then the critical path is the whole chain at 300s
#[test]
fn test_chain_critical_path() {
    let tasks = chain_tasks()
        .into_iter()
        .map(|t| t.with_duration(100))
        .collect();
    let report = validate(&graph(tasks));

    assert!(report.valid);
    assert_eq!(report.critical_path, ids(&["A", "B", "C"]));
    assert_eq!(report.critical_path_duration, 300);
    assert_eq!(report.total_estimated_time, 300);
}

/// Test: Diamond plans into three phases
#[test]
fn test_diamond_plan() {
    let g = graph(diamond_tasks());
    let plan = create_execution_plan(&g, Strategy::Adaptive).unwrap();

    assert_eq!(plan.strategy, Strategy::Parallel);
    assert_eq!(plan.phases.len(), 3);
    assert_eq!(plan.phases[1].tasks, ids(&["left", "right"]));
    assert_eq!(plan.phases[2].tasks, ids(&["join"]));
    assert_eq!(plan.estimated_duration, 30);
    assert_eq!(plan.total_duration, 40);
    assert_eq!(plan.parallelization_savings, 10);
}

/// Test: Independent tasks collapse into one phase
#[test]
fn test_independent_tasks_single_phase() {
    let g = graph(independent_tasks(6));
    let plan = create_execution_plan(&g, Strategy::Parallel).unwrap();

    assert_eq!(plan.phases.len(), 1);
    assert!(plan.phases[0].parallel);
    assert_eq!(plan.phases[0].estimated_duration, 10);
    assert_eq!(plan.parallelization_savings, 50);
}

/// Test: Sequential strategy keeps every phase sequential
#[test]
fn test_sequential_strategy() {
    let g = graph(diamond_tasks());
    let plan = create_execution_plan(&g, Strategy::Sequential).unwrap();

    assert!(plan.phases.iter().all(|p| !p.parallel));
    assert_eq!(plan.estimated_duration, plan.total_duration);
}

/// Test: Adaptive with nothing parallelizable resolves to sequential
#[test]
fn test_adaptive_without_parallel_tasks() {
    let tasks = independent_tasks(3)
        .into_iter()
        .map(|t| t.parallelizable(false))
        .collect();
    let plan = create_execution_plan(&graph(tasks), Strategy::Adaptive).unwrap();
    assert_eq!(plan.strategy, Strategy::Sequential);
    assert!(!plan.phases[0].parallel);
}

/// Test: Priority orders tasks inside a phase
#[test]
fn test_priority_within_phase() {
    let g = graph(vec![
        test_task("docs", &[]).with_priority(Priority::Low),
        test_task("core", &[]).with_priority(Priority::High),
        test_task("tests", &[]).with_kind(TaskKind::Validation),
    ]);
    let plan = create_execution_plan(&g, Strategy::Parallel).unwrap();
    assert_eq!(plan.phases[0].tasks, ids(&["core", "tests", "docs"]));
}

/// Test: Planning a graph with a cycle fails without producing phases
#[test]
fn test_planning_cycle_fails() {
    let g = graph(vec![test_task("A", &["B"]), test_task("B", &["A"])]);
    assert!(matches!(
        create_execution_plan(&g, Strategy::Parallel),
        Err(Error::Planning(_))
    ));
}

/// Test: Task files parse from JSON with defaults filled in
#[test]
fn test_task_list_from_json() {
    let json = r#"[
        {"id": "schema", "title": "Design schema", "estimated_duration": 30,
         "kind": "analysis", "priority": "high"},
        {"id": "api", "title": "Build API", "dependencies": ["schema"],
         "estimated_duration": 60},
        {"id": "docs", "title": "Write docs", "dependencies": ["api"],
         "estimated_duration": 1, "kind": "documentation", "parallelizable": false}
    ]"#;
    let tasks: Vec<conductor::core::Task> = serde_json::from_str(json).unwrap();
    let g = graph(tasks);
    let report = validate(&g);

    assert!(report.valid);
    assert_eq!(report.critical_path, ids(&["schema", "api", "docs"]));
    assert_eq!(report.critical_path_duration, 91);
}
