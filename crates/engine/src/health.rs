// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health monitoring for running executions.
//!
//! Activity is the maximum of several independent signals; any signal that
//! cannot be read is simply ignored. The stale verdict is gated by an
//! adaptive timeout keyed on the inferred task type, so a long test run is
//! not mistaken for a dead agent.

use crate::settings::HealthSettings;
use chrono::{DateTime, Utc};
use ralph_adapters::GitAdapter;
use ralph_core::{ExecutionRecord, HealthStatus, TaskType};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Progress artifact the agent appends to inside its worktree.
pub const PROGRESS_ARTIFACT: &str = ".ralph/progress.md";

/// Outcome of one health assessment.
#[derive(Debug, Clone)]
pub struct ActivityReport {
    pub last_activity: DateTime<Utc>,
    pub idle: Duration,
    pub task_type: TaskType,
    pub health: HealthStatus,
}

/// Computes per-execution activity freshness and a health label.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(settings: HealthSettings) -> Self {
        Self { settings }
    }

    /// Assess a running execution at `now`.
    pub async fn assess(
        &self,
        record: &ExecutionRecord,
        git: &dyn GitAdapter,
        now: DateTime<Utc>,
    ) -> ActivityReport {
        let mut last_activity = record.updated_at;
        let mut consider = |signal: Option<DateTime<Utc>>| {
            if let Some(ts) = signal {
                if ts > last_activity {
                    last_activity = ts;
                }
            }
        };

        if let Some(worktree) = &record.worktree_path {
            consider(mtime_utc(&worktree.join(PROGRESS_ARTIFACT)));
            consider(scan_worktree_mtime(
                worktree,
                self.settings.worktree_scan_limit,
            ));
        }

        if let Some(log_path) = &record.log_path {
            consider(mtime_utc(log_path));
        }

        // Branch commit time counts only once the branch has advanced past
        // its fork point, mirroring the ghost-merge guard.
        let mut commit_message = None;
        match git.branch_head(&record.project_root, &record.branch).await {
            Ok(Some(head)) if record.base_commit_sha.as_deref() != Some(head.as_str()) => {
                match git
                    .head_commit_epoch_ms(&record.project_root, &record.branch)
                    .await
                {
                    Ok(ts) => consider(ts.and_then(|ms| DateTime::from_timestamp_millis(ms as i64))),
                    Err(e) => debug!(branch = %record.branch, error = %e, "commit time unavailable"),
                }
                commit_message = git
                    .latest_commit_message(&record.project_root, &record.branch)
                    .await
                    .ok()
                    .flatten();
            }
            Ok(_) => {}
            Err(e) => debug!(branch = %record.branch, error = %e, "branch head unavailable"),
        }

        let idle = (now - last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let task_type = self.infer_task_type(record, commit_message.as_deref());
        let health = self.classify(idle, task_type);

        ActivityReport {
            last_activity,
            idle,
            task_type,
            health,
        }
    }

    /// Keyword-scan the freshest textual evidence for the current task
    /// class. Ordered by reliability: explicit step, commit message,
    /// last error, log tail.
    fn infer_task_type(&self, record: &ExecutionRecord, commit_message: Option<&str>) -> TaskType {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(step) = &record.current_step {
            candidates.push(step.clone());
        }
        if let Some(msg) = commit_message {
            candidates.push(msg.to_string());
        }
        if let Some(err) = &record.last_error {
            candidates.push(err.clone());
        }
        if let Some(log_path) = &record.log_path {
            if let Some(tail) = read_tail(log_path, self.settings.log_tail_bytes) {
                candidates.push(tail);
            }
        }

        candidates
            .iter()
            .map(|text| TaskType::from_keywords(text))
            .find(|t| *t != TaskType::Unknown)
            .unwrap_or(TaskType::Unknown)
    }

    /// Label thresholds are coarser than the stale timeout: `stale` needs
    /// both the stale threshold and the adaptive task timeout exceeded.
    fn classify(&self, idle: Duration, task_type: TaskType) -> HealthStatus {
        if idle < self.settings.active_threshold {
            HealthStatus::Active
        } else if idle < self.settings.at_risk_threshold {
            HealthStatus::Idle
        } else if idle < self.settings.stale_threshold {
            HealthStatus::AtRisk
        } else if idle > self.settings.adaptive_timeout(task_type) {
            HealthStatus::Stale
        } else {
            HealthStatus::AtRisk
        }
    }
}

/// File modification time as a UTC timestamp.
pub(crate) fn mtime_utc(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .ok()?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Newest mtime over a bounded sample of worktree files. Skips `.git`.
fn scan_worktree_mtime(root: &Path, limit: usize) -> Option<DateTime<Utc>> {
    let mut newest: Option<DateTime<Utc>> = None;
    let mut visited = 0usize;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            if visited >= limit {
                return newest;
            }
            let path = entry.path();
            let name = entry.file_name();
            if name == ".git" {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                visited += 1;
                if let Some(ts) = mtime_utc(&path) {
                    if newest.is_none_or(|n| ts > n) {
                        newest = Some(ts);
                    }
                }
            }
        }
    }

    newest
}

/// Bounded read of a file's final bytes.
fn read_tail(path: &Path, max_bytes: u64) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).ok()?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
