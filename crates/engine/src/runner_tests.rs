// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::FixedMemory;
use crate::prompt::DefaultPromptGenerator;
use ralph_adapters::{FakeGit, FakeLauncher};
use ralph_core::{ExecutionConfig, FakeClock, Priority};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    clock: FakeClock,
    store: Arc<StateStore<FakeClock>>,
    git: Arc<FakeGit>,
    launcher: Arc<FakeLauncher>,
    runner: Runner<FakeClock>,
    events: mpsc::Receiver<RunnerEvent>,
}

fn harness_with(settings: RunnerSettings, free_memory_gb: f64) -> Harness {
    let tmp = TempDir::new().unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(ralph_core::SystemClock.epoch_ms());

    let store = Arc::new(StateStore::with_clock(tmp.path(), clock.clone()));
    let git = Arc::new(FakeGit::new());
    let launcher = Arc::new(FakeLauncher::new());
    let (tx, rx) = mpsc::channel(64);

    let deps = RunnerDeps {
        store: Arc::clone(&store),
        git: Arc::clone(&git) as Arc<dyn GitAdapter>,
        launcher: Arc::clone(&launcher) as Arc<dyn Launcher>,
        prompts: Arc::new(DefaultPromptGenerator),
        memory: Arc::new(FixedMemory(free_memory_gb)),
    };
    let runner = Runner::new(deps, settings, clock.clone(), tx);

    Harness {
        _tmp: tmp,
        clock,
        store,
        git,
        launcher,
        runner,
        events: rx,
    }
}

fn harness() -> Harness {
    harness_with(RunnerSettings::default(), 16.0)
}

fn insert(
    h: &Harness,
    id: &str,
    branch: &str,
    priority: Priority,
    deps: Vec<String>,
) -> ExecutionRecord {
    let config = ExecutionConfig::builder(id, branch, format!("/prds/{id}.md"))
        .project_root("/repo")
        .priority(priority)
        .dependencies(deps)
        .base_commit_sha("base0000")
        .build();
    let record = ExecutionRecord::new(config, h.clock.now_utc());
    h.store.insert_execution(record.clone()).unwrap();
    h.git.add_branch(branch, "base0000");
    record
}

fn force_running(h: &Harness, id: &str) {
    h.store
        .update_execution(
            id,
            ExecutionPatch::new()
                .status(ExecutionStatus::Running)
                .agent(format!("task-{id}"), Some(std::process::id()))
                .startup_confirmed_at(h.clock.now_utc()),
            UpdateOpts {
                skip_transition_validation: true,
            },
        )
        .unwrap();
}

fn drain_events(h: &mut Harness) -> Vec<RunnerEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = h.events.try_recv() {
        out.push(ev);
    }
    out
}

async fn tick_and_drain(h: &mut Harness) {
    h.runner.tick().await;
    h.runner.drain_launches(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn dependency_promotion_then_launch() {
    let mut h = harness();
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);
    insert(&h, "b", "ralph/b", Priority::P1, vec!["ralph/a".to_string()]);
    assert_eq!(
        h.store.find_execution_by_id("b").unwrap().unwrap().status,
        ExecutionStatus::Pending
    );

    // Dependency finishes successfully
    h.store
        .update_execution(
            "a",
            ExecutionPatch::new().status(ExecutionStatus::Completed),
            UpdateOpts {
                skip_transition_validation: true,
            },
        )
        .unwrap();

    tick_and_drain(&mut h).await;

    let b = h.store.find_execution_by_id("b").unwrap().unwrap();
    assert_eq!(b.status, ExecutionStatus::Running);
    assert!(b.agent_task_id.is_some());
    assert_eq!(b.launch_attempts, 1);
    assert!(h.runner.active_launches().is_empty());
    assert!(drain_events(&mut h)
        .iter()
        .any(|e| matches!(e, RunnerEvent::PrdStarted { branch, .. } if branch == "ralph/b")));
}

#[tokio::test]
async fn unsatisfied_dependency_stays_pending() {
    let mut h = harness();
    insert(&h, "b", "ralph/b", Priority::P1, vec!["ralph/a".to_string()]);

    tick_and_drain(&mut h).await;

    assert_eq!(
        h.store.find_execution_by_id("b").unwrap().unwrap().status,
        ExecutionStatus::Pending
    );
    assert_eq!(h.launcher.launch_count(), 0);
}

#[tokio::test]
async fn launch_timeout_reverts_to_ready_with_budget_left() {
    // Memory-starved so the sweep result is not immediately re-launched
    let mut settings = RunnerSettings::default();
    settings.launch_timeout = Duration::from_secs(30);
    let mut h = harness_with(settings, 0.0);

    insert(&h, "r", "ralph/r", Priority::P1, vec![]);
    let attempt_at = h.clock.now_utc() - chrono::Duration::seconds(35);
    h.store
        .update_execution(
            "r",
            ExecutionPatch::new()
                .status(ExecutionStatus::Starting)
                .launch_attempt(attempt_at, 1),
            UpdateOpts::default(),
        )
        .unwrap();

    h.runner.tick().await;

    let r = h.store.find_execution_by_id("r").unwrap().unwrap();
    assert_eq!(r.status, ExecutionStatus::Ready);
    assert!(r.last_error.as_deref().unwrap().contains("Launch timeout"));
    assert_eq!(r.launch_attempts, 1);
}

#[tokio::test]
async fn launch_timeout_with_exhausted_budget_fails() {
    let mut settings = RunnerSettings::default();
    settings.launch_timeout = Duration::from_secs(30);
    settings.max_retries = 3;
    let mut h = harness_with(settings, 0.0);

    insert(&h, "r", "ralph/r", Priority::P1, vec![]);
    let attempt_at = h.clock.now_utc() - chrono::Duration::seconds(35);
    h.store
        .update_execution(
            "r",
            ExecutionPatch::new()
                .status(ExecutionStatus::Starting)
                .launch_attempt(attempt_at, 3),
            UpdateOpts::default(),
        )
        .unwrap();

    h.runner.tick().await;

    let r = h.store.find_execution_by_id("r").unwrap().unwrap();
    assert_eq!(r.status, ExecutionStatus::Failed);
    assert!(r
        .last_error
        .as_deref()
        .unwrap()
        .contains("Launch failed after 3 attempts"));
    assert!(drain_events(&mut h)
        .iter()
        .any(|e| matches!(e, RunnerEvent::PrdFailed { .. })));
}

#[tokio::test]
async fn interrupted_records_are_auto_recovered() {
    let mut h = harness_with(RunnerSettings::default(), 0.0);
    insert(&h, "r", "ralph/r", Priority::P1, vec![]);
    h.store
        .update_execution(
            "r",
            ExecutionPatch::new()
                .status(ExecutionStatus::Interrupted)
                .launch_attempts(2)
                .last_error("agent process exited"),
            UpdateOpts {
                skip_transition_validation: true,
            },
        )
        .unwrap();

    h.runner.tick().await;

    let r = h.store.find_execution_by_id("r").unwrap().unwrap();
    assert_eq!(r.status, ExecutionStatus::Ready);
    assert_eq!(r.launch_attempts, 0);
    assert_eq!(r.last_error, None);
}

#[tokio::test]
async fn concurrency_cap_pauses_launches_with_one_warning() {
    let mut h = harness();
    h.store.set_runner_max_concurrency(2, None).unwrap();
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);
    insert(&h, "b", "ralph/b", Priority::P1, vec![]);
    force_running(&h, "a");
    force_running(&h, "b");
    insert(&h, "c", "ralph/c", Priority::P0, vec![]);

    tick_and_drain(&mut h).await;
    assert_eq!(h.launcher.launch_count(), 0);
    let warnings = drain_events(&mut h)
        .into_iter()
        .filter(|e| matches!(e, RunnerEvent::Log { message } if message.contains("pausing launches")))
        .count();
    assert_eq!(warnings, 1);

    // Still saturated: no repeat warning
    tick_and_drain(&mut h).await;
    assert_eq!(h.launcher.launch_count(), 0);
    let repeat = drain_events(&mut h)
        .into_iter()
        .filter(|e| matches!(e, RunnerEvent::Log { message } if message.contains("pausing launches")))
        .count();
    assert_eq!(repeat, 0);
}

#[tokio::test]
async fn priority_dominates_fifo() {
    let mut h = harness();
    h.store.set_runner_max_concurrency(1, None).unwrap();
    insert(&h, "old-p2", "ralph/old", Priority::P2, vec![]);
    h.clock.advance(Duration::from_secs(600));
    insert(&h, "new-p0", "ralph/new", Priority::P0, vec![]);

    tick_and_drain(&mut h).await;

    let launches = h.launcher.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].execution_id, "new-p0");
    assert_eq!(
        h.store.find_execution_by_id("old-p2").unwrap().unwrap().status,
        ExecutionStatus::Ready
    );
}

#[tokio::test]
async fn budget_limits_launches_per_tick() {
    let mut h = harness();
    h.store.set_runner_max_concurrency(2, None).unwrap();
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);
    insert(&h, "b", "ralph/b", Priority::P1, vec![]);
    insert(&h, "c", "ralph/c", Priority::P1, vec![]);

    tick_and_drain(&mut h).await;

    assert_eq!(h.launcher.launch_count(), 2);
    let running = h
        .store
        .list_executions()
        .unwrap()
        .iter()
        .filter(|r| r.status == ExecutionStatus::Running)
        .count();
    assert_eq!(running, 2);
}

#[tokio::test]
async fn low_memory_pauses_with_one_log() {
    let mut h = harness_with(RunnerSettings::default(), 2.5);
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);

    tick_and_drain(&mut h).await;
    tick_and_drain(&mut h).await;

    assert_eq!(h.launcher.launch_count(), 0);
    let pauses = drain_events(&mut h)
        .into_iter()
        .filter(|e| matches!(e, RunnerEvent::Log { message } if message.contains("low memory")))
        .count();
    assert_eq!(pauses, 1);
}

#[tokio::test]
async fn failed_launch_reverts_to_ready() {
    let mut h = harness();
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);
    h.launcher.script_failure("agent binary not found");

    tick_and_drain(&mut h).await;

    let r = h.store.find_execution_by_id("a").unwrap().unwrap();
    assert_eq!(r.status, ExecutionStatus::Ready);
    assert!(r
        .last_error
        .as_deref()
        .unwrap()
        .contains("agent binary not found"));
    assert_eq!(r.launch_attempts, 1);
}

#[tokio::test]
async fn failed_launch_with_exhausted_attempts_fails_terminally() {
    let mut h = harness();
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);
    // Two prior attempts; the claim makes it three
    h.store
        .update_execution(
            "a",
            ExecutionPatch::new().launch_attempts(2),
            UpdateOpts::default(),
        )
        .unwrap();
    h.launcher.script_failure("agent binary not found");

    tick_and_drain(&mut h).await;

    let r = h.store.find_execution_by_id("a").unwrap().unwrap();
    assert_eq!(r.status, ExecutionStatus::Failed);
    assert!(r
        .last_error
        .as_deref()
        .unwrap()
        .contains("Launch failed after 3 attempts"));
    assert!(drain_events(&mut h)
        .iter()
        .any(|e| matches!(e, RunnerEvent::PrdFailed { .. })));
}

#[tokio::test]
async fn cli_concurrency_caps_below_stored_config() {
    let mut settings = RunnerSettings::default();
    settings.configured_concurrency = Some(1);
    let mut h = harness_with(settings, 16.0);
    h.store.set_runner_max_concurrency(4, None).unwrap();
    insert(&h, "a", "ralph/a", Priority::P1, vec![]);
    insert(&h, "b", "ralph/b", Priority::P1, vec![]);

    tick_and_drain(&mut h).await;

    assert_eq!(h.launcher.launch_count(), 1);
}

#[tokio::test]
async fn stop_handle_ends_the_run_loop() {
    let mut settings = RunnerSettings::default();
    settings.poll_interval = Duration::from_millis(20);
    settings.drain_grace = Duration::from_millis(200);
    let h = harness_with(settings, 16.0);

    let handle = h.runner.handle();
    let mut runner = h.runner;
    let join = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.stop();

    tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("runner did not stop in time")
        .unwrap();
}
