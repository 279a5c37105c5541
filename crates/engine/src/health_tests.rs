// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ralph_adapters::FakeGit;
use ralph_core::{Clock, ExecutionConfig, ExecutionRecord, FakeClock, SystemClock};

fn monitor() -> HealthMonitor {
    HealthMonitor::new(crate::settings::HealthSettings::default())
}

/// Fake clock pinned to real wall-clock time so file mtimes compare sanely.
fn wall_clock() -> FakeClock {
    let clock = FakeClock::new();
    clock.set_epoch_ms(SystemClock.epoch_ms());
    clock
}

fn running_record(clock: &FakeClock) -> ExecutionRecord {
    let config = ExecutionConfig::builder("e1", "ralph/feature", "/prds/feature.md")
        .project_root("/repo")
        .base_commit_sha("base0000")
        .build();
    ExecutionRecord::new(config, clock.now_utc())
}

#[tokio::test]
async fn fresh_record_is_active() {
    let clock = wall_clock();
    let record = running_record(&clock);
    let git = FakeGit::new();

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::Active);
    assert_eq!(report.last_activity, record.updated_at);
}

#[tokio::test]
async fn two_minutes_idle_is_idle() {
    let clock = wall_clock();
    let record = running_record(&clock);
    clock.advance(Duration::from_secs(2 * 60));
    let git = FakeGit::new();

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::Idle);
}

#[tokio::test]
async fn ten_minutes_idle_is_at_risk() {
    let clock = wall_clock();
    let record = running_record(&clock);
    clock.advance(Duration::from_secs(10 * 60));
    let git = FakeGit::new();

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::AtRisk);
}

#[tokio::test]
async fn implementing_goes_stale_after_its_timeout() {
    let clock = wall_clock();
    let mut record = running_record(&clock);
    record.current_step = Some("implementing the parser".to_string());
    clock.advance(Duration::from_secs(40 * 60));
    let git = FakeGit::new();

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.task_type, ralph_core::TaskType::Implementing);
    assert_eq!(report.health, ralph_core::HealthStatus::Stale);
}

#[tokio::test]
async fn building_survives_forty_minutes_of_quiet() {
    let clock = wall_clock();
    let mut record = running_record(&clock);
    record.current_step = Some("building the workspace".to_string());
    clock.advance(Duration::from_secs(40 * 60));
    let git = FakeGit::new();

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.task_type, ralph_core::TaskType::Building);
    // Past the stale threshold but within the 60-minute build timeout
    assert_eq!(report.health, ralph_core::HealthStatus::AtRisk);
}

#[tokio::test]
async fn unknown_task_type_uses_the_short_timeout() {
    let clock = wall_clock();
    let record = running_record(&clock);
    clock.advance(Duration::from_secs(25 * 60));
    let git = FakeGit::new();

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.task_type, ralph_core::TaskType::Unknown);
    assert_eq!(report.health, ralph_core::HealthStatus::Stale);
}

#[tokio::test]
async fn advanced_branch_commit_counts_as_activity() {
    let clock = wall_clock();
    let record = running_record(&clock);
    clock.advance(Duration::from_secs(40 * 60));

    let git = FakeGit::new();
    git.add_branch("ralph/feature", "head1111");
    // Commit four minutes ago
    git.set_commit(
        "ralph/feature",
        clock.epoch_ms() - 4 * 60 * 1000,
        "implementing parser edge cases",
    );

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::Idle);
    assert_eq!(report.task_type, ralph_core::TaskType::Implementing);
}

#[tokio::test]
async fn unadvanced_branch_commit_is_ignored() {
    let clock = wall_clock();
    let record = running_record(&clock);
    clock.advance(Duration::from_secs(25 * 60));

    // HEAD still equals the fork point: commit time must not count
    let git = FakeGit::new();
    git.add_branch("ralph/feature", "base0000");
    git.set_commit("ralph/feature", clock.epoch_ms(), "initial");

    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::Stale);
}

#[tokio::test]
async fn fresh_progress_artifact_keeps_the_record_active() {
    let tmp = tempfile::TempDir::new().unwrap();
    let clock = wall_clock();
    let mut record = running_record(&clock);
    record.worktree_path = Some(tmp.path().to_path_buf());
    clock.advance(Duration::from_secs(25 * 60));

    let progress = tmp.path().join(PROGRESS_ARTIFACT);
    std::fs::create_dir_all(progress.parent().unwrap()).unwrap();
    std::fs::write(&progress, "working on story 2\n").unwrap();

    let git = FakeGit::new();
    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::Active);
}

#[tokio::test]
async fn worktree_file_mtimes_count_as_activity() {
    let tmp = tempfile::TempDir::new().unwrap();
    let clock = wall_clock();
    let mut record = running_record(&clock);
    record.worktree_path = Some(tmp.path().to_path_buf());
    clock.advance(Duration::from_secs(25 * 60));

    std::fs::create_dir_all(tmp.path().join("src")).unwrap();
    std::fs::write(tmp.path().join("src/main.rs"), "fn main() {}\n").unwrap();

    let git = FakeGit::new();
    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.health, ralph_core::HealthStatus::Active);
}

#[tokio::test]
async fn log_tail_informs_task_type() {
    let tmp = tempfile::TempDir::new().unwrap();
    let clock = wall_clock();
    let mut record = running_record(&clock);
    let log = tmp.path().join("agent.log");
    std::fs::write(&log, "compiling crate foo\nrunning tests for bar\n").unwrap();
    record.log_path = Some(log);

    let git = FakeGit::new();
    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    // Log mtime is fresh, so the record is active; tail drives the type
    assert_eq!(report.task_type, ralph_core::TaskType::Testing);
    assert_eq!(report.health, ralph_core::HealthStatus::Active);
}

#[tokio::test]
async fn current_step_outranks_log_tail() {
    let tmp = tempfile::TempDir::new().unwrap();
    let clock = wall_clock();
    let mut record = running_record(&clock);
    record.current_step = Some("verifying acceptance criteria".to_string());
    let log = tmp.path().join("agent.log");
    std::fs::write(&log, "running tests\n").unwrap();
    record.log_path = Some(log);

    let git = FakeGit::new();
    let report = monitor().assess(&record, &git, clock.now_utc()).await;
    assert_eq!(report.task_type, ralph_core::TaskType::Verifying);
}
