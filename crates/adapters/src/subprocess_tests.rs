// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn successful_command_returns_output() {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("echo hello");
    let output = run_with_timeout(cmd, Duration::from_secs(5), "echo")
        .await
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
}

#[tokio::test]
async fn timeout_produces_descriptive_error() {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("sleep 10");
    let err = run_with_timeout(cmd, Duration::from_millis(50), "slow probe")
        .await
        .unwrap_err();
    assert!(err.contains("slow probe timed out"));
}

#[tokio::test]
async fn missing_binary_reports_failure() {
    let cmd = Command::new("definitely-not-a-real-binary-xyz");
    let err = run_with_timeout(cmd, Duration::from_secs(1), "probe")
        .await
        .unwrap_err();
    assert!(err.contains("probe failed"));
}
