// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

fn spec(tmp: &TempDir) -> LaunchSpec {
    LaunchSpec {
        execution_id: "exec-1".to_string(),
        prompt: "do the thing".to_string(),
        cwd: tmp.path().to_path_buf(),
        log_path: Some(tmp.path().join("agent.log")),
    }
}

#[tokio::test]
async fn long_running_child_is_deemed_success_after_window() {
    let tmp = TempDir::new().unwrap();
    let launcher = DetachedLauncher::new("sh", vec!["-c".into(), "sleep 30".into()])
        .with_startup_window(Duration::from_millis(100));

    let outcome = launcher.launch(spec(&tmp)).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert!(outcome.agent_pid.is_some());
    assert!(outcome.agent_task_id.is_some());
    assert!(pid_alive(outcome.agent_pid.unwrap()));
}

#[tokio::test]
async fn early_nonzero_exit_is_a_failure() {
    let tmp = TempDir::new().unwrap();
    let launcher = DetachedLauncher::new("sh", vec!["-c".into(), "exit 3".into()])
        .with_startup_window(Duration::from_secs(5));

    let outcome = launcher.launch(spec(&tmp)).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("exited during startup"));
}

#[tokio::test]
async fn early_clean_exit_counts_as_success() {
    let tmp = TempDir::new().unwrap();
    let launcher = DetachedLauncher::new("sh", vec!["-c".into(), "exit 0".into()])
        .with_startup_window(Duration::from_secs(5));

    let outcome = launcher.launch(spec(&tmp)).await;
    assert!(outcome.success);
}

#[tokio::test]
async fn prompt_placeholder_is_substituted_and_logged() {
    let tmp = TempDir::new().unwrap();
    let launcher = DetachedLauncher::new("sh", vec!["-c".into(), "echo ${prompt}".into()])
        .with_startup_window(Duration::from_secs(5));

    let outcome = launcher.launch(spec(&tmp)).await;
    assert!(outcome.success);

    let log = std::fs::read_to_string(tmp.path().join("agent.log")).unwrap();
    assert!(log.contains("do the thing"));
}

#[tokio::test]
async fn missing_program_fails_with_spawn_error() {
    let tmp = TempDir::new().unwrap();
    let launcher = DetachedLauncher::new("no-such-agent-binary-xyz", vec![]);

    let outcome = launcher.launch(spec(&tmp)).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("spawn failed"));
}

#[tokio::test]
async fn fake_launcher_scripts_outcomes_in_order() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    launcher.script_failure("no capacity");

    let first = launcher.launch(spec(&tmp)).await;
    assert!(!first.success);

    let second = launcher.launch(spec(&tmp)).await;
    assert!(second.success);
    assert_eq!(launcher.launch_count(), 2);
}
