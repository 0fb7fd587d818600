//! End-to-end scheduler scenarios (spec.md §8).

use std::time::{Duration, Instant};

use workflow_core::{resume, Backend, BackendJobId, GraphModel, ScheduledChild, SchedulerConfig, Scheduler, Successor, Task, TickOutcome};
use workflow_test_utils::MockBackend;

async fn run_to_completion(
    scheduler: &mut Scheduler,
    backend: &MockBackend,
) -> Result<(), workflow_core::SchedulerError> {
    for _ in 0..100 {
        match scheduler.tick(backend, Instant::now()).await? {
            TickOutcome::Complete => return Ok(()),
            TickOutcome::Continue => {}
        }
    }
    panic!("workflow did not complete within 100 ticks");
}

#[tokio::test]
async fn linear_chain_runs_in_order_and_empties_out() {
    let a = Task::command("A", "echo").init_args(["a"]).on_finish("default", vec![Successor::Task("B".into())]).build();
    let b = Task::command("B", "echo")
        .init_args(["b"])
        .wait_for(["A"])
        .on_finish("default", vec![Successor::Task("C".into())])
        .build();
    let c = Task::command("C", "echo").init_args(["c"]).wait_for(["B"]).build();

    let graph = GraphModel::from_tasks([a, b, c]).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string()]).unwrap();

    run_to_completion(&mut scheduler, &backend).await.unwrap();

    assert!(scheduler.pending().is_empty());
    assert!(scheduler.running().is_empty());
}

#[tokio::test]
async fn diamond_admits_both_middle_tasks_before_the_join() {
    let a = Task::command("A", "echo")
        .on_finish("default", vec![Successor::Task("B".into()), Successor::Task("C".into())])
        .build();
    let b = Task::command("B", "echo")
        .wait_for(["A"])
        .on_finish("default", vec![Successor::Task("D".into())])
        .build();
    let c = Task::command("C", "echo")
        .wait_for(["A"])
        .on_finish("default", vec![Successor::Task("D".into())])
        .build();
    let d = Task::command("D", "echo").wait_for(["B", "C"]).build();

    let graph = GraphModel::from_tasks([a, b, c, d]).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string()]).unwrap();

    // tick 1: A submitted.
    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.running().len(), 1);
    // tick 2: A finishes, B and C both become pending and both start
    // (same tick, sorted order) since neither depends on the other.
    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.running().len(), 2);
    assert!(scheduler.pending().is_empty());

    run_to_completion(&mut scheduler, &backend).await.unwrap();
    assert!(scheduler.pending().is_empty());
    assert!(scheduler.running().is_empty());
}

#[tokio::test]
async fn resource_contention_admits_only_one_per_tick() {
    let mut cpu = std::collections::BTreeMap::new();
    cpu.insert("cpu".to_string(), workflow_core::Amount::from_integer(1));
    let x = Task::command("X", "echo").init_args(["x"]).require(cpu.clone()).build();
    let y = Task::command("Y", "echo").init_args(["y"]).require(cpu).build();

    let graph = GraphModel::from_tasks([x, y]).unwrap();
    let backend = MockBackend::new();
    backend.with_ticks("echo x", 5);
    backend.with_ticks("echo y", 5);
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["X".to_string(), "Y".to_string()]).unwrap();

    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.running().len(), 1, "only one of X/Y should have acquired the single cpu unit");
    assert_eq!(scheduler.pending().len(), 1);
}

#[tokio::test]
async fn retry_budget_is_exhausted_after_the_configured_number_of_attempts() {
    let a = Task::command("A", "echo")
        .init_args(["a"])
        .retries(2)
        .on_finish("failed", vec![Successor::Retry])
        .build();

    let graph = GraphModel::from_tasks([a]).unwrap();
    let backend = MockBackend::new();
    backend.with_outcome("echo a", "failed");
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string()]).unwrap();

    run_to_completion(&mut scheduler, &backend).await.unwrap();

    assert!(scheduler.pending().is_empty());
    assert!(scheduler.running().is_empty());
}

#[tokio::test]
async fn fan_out_expands_into_n_units_and_downstream_waits_on_all_of_them() {
    let p = Task::command("P", "echo")
        .parallel_arg("--shard=%d")
        .on_finish("default", vec![Successor::Task("Q".into())])
        .build();
    let q = Task::command("Q", "echo").wait_for(["P"]).build();

    let graph = GraphModel::from_tasks([p, q]).unwrap();
    let backend = MockBackend::new();
    let config = SchedulerConfig::default().with_parallelization(3);
    let mut scheduler = Scheduler::new(&graph, config, Instant::now());
    scheduler.seed_starting_jobs(&["P".to_string()]).unwrap();

    // tick 1: P expands into P_0, P_1, P_2, all three start (no resources,
    // no deps).
    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.running().len(), 3);

    // tick 2: all three finish; only unit 0's on_finish fires, adding Q as
    // pending with Q.wait_for initially only satisfied once P_1/P_2 (which
    // were rewritten onto Q.wait_for at expansion time) also complete.
    scheduler.tick(&backend, Instant::now()).await.unwrap();

    run_to_completion(&mut scheduler, &backend).await.unwrap();
    assert!(scheduler.pending().is_empty());
    assert!(scheduler.running().is_empty());
}

#[tokio::test]
async fn stalemate_escape_admits_one_job_blocked_only_on_unknown_tasks() {
    let m = Task::command("M", "echo").init_args(["m"]).wait_for(["Z"]).build();
    let n = Task::command("N", "echo").init_args(["n"]).wait_for(["Z"]).build();

    let graph = GraphModel::from_tasks([m, n]).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["M".to_string(), "N".to_string()]).unwrap();

    scheduler.tick(&backend, Instant::now()).await.unwrap();
    // Neither shares an origin (both None), so Pass B co-promotes both:
    // both have origin=None which matches.
    assert_eq!(scheduler.running().len(), 2);
}

#[tokio::test]
async fn real_dependency_cycle_is_reported_as_an_error() {
    let u = Task::command("U", "echo").wait_for(["V"]).build();
    let v = Task::command("V", "echo").wait_for(["U"]).build();

    let graph = GraphModel::from_tasks([u, v]).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["U".to_string(), "V".to_string()]).unwrap();

    let err = scheduler.tick(&backend, Instant::now()).await.unwrap_err();
    match err {
        workflow_core::SchedulerError::DependencyCycle { stuck } => {
            assert_eq!(stuck.len(), 2);
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
}

#[tokio::test]
async fn wait_time_defers_admission_until_elapsed() {
    let a = Task::command("A", "echo").wait_time(Duration::from_secs(3600)).build();
    let graph = GraphModel::from_tasks([a]).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string()]).unwrap();

    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.pending().len(), 1, "A should still be waiting on its timer");
    assert!(scheduler.running().is_empty());
}

#[tokio::test]
async fn max_running_jobs_caps_concurrent_admission() {
    let a = Task::command("A", "echo").init_args(["a"]).build();
    let b = Task::command("B", "echo").init_args(["b"]).build();
    let graph = GraphModel::from_tasks([a, b]).unwrap();
    let backend = MockBackend::new();
    backend.with_ticks("echo a", 5);
    backend.with_ticks("echo b", 5);
    let config = SchedulerConfig::default().with_max_running_jobs(Some(1));
    let mut scheduler = Scheduler::new(&graph, config, Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string(), "B".to_string()]).unwrap();

    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.running().len(), 1);
    assert_eq!(scheduler.pending().len(), 1);
}

#[tokio::test]
async fn submission_decline_leaves_job_pending_and_releases_resources() {
    // B has no decline and keeps running across the tick, which keeps
    // Pass B (stalemate escape) from sweeping A's decline up in the same
    // tick -- Pass B only fires when running is empty.
    let mut cpu = std::collections::BTreeMap::new();
    cpu.insert("cpu".to_string(), workflow_core::Amount::from_integer(1));
    let a = Task::command("A", "echo").init_args(["a"]).require(cpu.clone()).build();
    let b = Task::command("B", "echo").init_args(["b"]).require(cpu).build();
    let graph = GraphModel::from_tasks([a, b]).unwrap();
    let backend = MockBackend::new();
    backend.decline_once("echo a");
    backend.with_ticks("echo b", 5);
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string(), "B".to_string()]).unwrap();

    scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(scheduler.running().len(), 1, "only B should have started; A's submission was declined");
    assert_eq!(scheduler.pending().len(), 1, "A stays pending, proving its cpu unit was released rather than leaked");
}

#[tokio::test]
async fn idempotence_of_completion_handling() {
    let a = Task::command("A", "echo").build();
    let graph = GraphModel::from_tasks([a]).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string()]).unwrap();

    scheduler.tick(&backend, Instant::now()).await.unwrap();
    let outcome = scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(outcome, TickOutcome::Complete);
    // Ticking again after completion is a no-op, not an error.
    let outcome = scheduler.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(outcome, TickOutcome::Complete);
}

#[tokio::test]
async fn resume_equivalence_ends_immediately_with_an_empty_pending_set() {
    const MANAGER: &str = "wf";

    fn chain() -> Vec<Task> {
        let a = Task::command("A", "echo")
            .init_args(["a"])
            .on_finish("default", vec![Successor::Task("B".into())])
            .build();
        let b = Task::command("B", "echo")
            .init_args(["b"])
            .wait_for(["A"])
            .on_finish("default", vec![Successor::Task("C".into())])
            .build();
        let c = Task::command("C", "echo").init_args(["c"]).wait_for(["B"]).build();
        vec![a, b, c]
    }

    // First run: drive A -> B -> C to completion with `--starting-job A`.
    let graph = GraphModel::from_tasks(chain()).unwrap();
    let backend = MockBackend::new();
    let mut scheduler = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    scheduler.seed_starting_jobs(&["A".to_string()]).unwrap();
    run_to_completion(&mut scheduler, &backend).await.unwrap();
    assert!(scheduler.pending().is_empty());
    assert!(scheduler.running().is_empty());

    // Register what the backend would report for that completed run: each
    // task scheduled as a child of the prior manager job, and the prior
    // manager job's own recorded command line carrying `--starting-job A`.
    let resume_job_id = BackendJobId::from("prior-run");
    backend.with_scheduled_children(
        "prior-run",
        vec![
            ScheduledChild { index: 0, name: format!("{MANAGER}/A"), job_id: BackendJobId::from("job-a") },
            ScheduledChild { index: 0, name: format!("{MANAGER}/B"), job_id: BackendJobId::from("job-b") },
            ScheduledChild { index: 0, name: format!("{MANAGER}/C"), job_id: BackendJobId::from("job-c") },
        ],
    );
    backend.with_job_cmd("prior-run", vec!["workflow-manager".to_string(), "--starting-job".to_string(), "A".to_string()]);

    // Second run: resolve the resume frontier exactly as the driver loop
    // does, then seed a fresh scheduler with it.
    let ran = resume::ran_tasks(&backend, MANAGER, &resume_job_id).await.unwrap();
    let argv = backend.job_cmd(&resume_job_id).await.unwrap();
    let candidates = resume::starting_jobs_from_cmd(&argv);
    let frontier = resume::resolve_starting_frontier(&graph, &ran, &candidates);
    assert!(frontier.is_empty(), "every task in the chain already ran, so the frontier is empty");

    let mut resumed = Scheduler::new(&graph, SchedulerConfig::default(), Instant::now());
    resumed.seed_starting_jobs(&frontier).unwrap();
    let outcome = resumed.tick(&backend, Instant::now()).await.unwrap();
    assert_eq!(outcome, TickOutcome::Complete);
    assert!(resumed.pending().is_empty());
    assert!(resumed.running().is_empty());
}
