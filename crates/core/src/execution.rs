// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution record: the central entity, one per PRD attempt-lineage.

use crate::failure::FailureReason;
use crate::status::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for an execution record.
    pub struct ExecutionId;
}

/// Scheduling priority. P0 beats P1 beats P2; FIFO breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Priority {
    P0,
    #[default]
    P1,
    P2,
}

impl Priority {
    /// Sort key: lower rank launches first.
    pub fn rank(self) -> u8 {
        match self {
            Self::P0 => 0,
            Self::P1 => 1,
            Self::P2 => 2,
        }
    }

    /// Parse a priority label. Unknown values fall back to the default (P1).
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Self::P0,
            "P2" => Self::P2,
            _ => Self::P1,
        }
    }
}

// Invalid stored values must degrade to P1, not fail the whole document load.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Priority::parse_lossy(&s))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P0 => write!(f, "P0"),
            Self::P1 => write!(f, "P1"),
            Self::P2 => write!(f, "P2"),
        }
    }
}

/// Activity-freshness label assigned by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Active,
    Idle,
    AtRisk,
    Stale,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::AtRisk => "at_risk",
            Self::Stale => "stale",
        };
        write!(f, "{s}")
    }
}

/// Inferred class of work the agent is currently doing.
///
/// Drives the adaptive stale timeout: builds and test runs are legitimately
/// quiet for much longer than implementation work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implementing,
    Building,
    Testing,
    Verifying,
    #[default]
    Unknown,
}

impl TaskType {
    /// Infer a task type by keyword-scanning free-form text (current step,
    /// commit message, error text, log tail). First match wins.
    pub fn from_keywords(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.contains("verif") || lower.contains("review") {
            Self::Verifying
        } else if lower.contains("test") {
            Self::Testing
        } else if lower.contains("build") || lower.contains("compil") || lower.contains("lint") {
            Self::Building
        } else if lower.contains("implement")
            || lower.contains("refactor")
            || lower.contains("writ")
            || lower.contains("fix")
        {
            Self::Implementing
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Implementing => "implementing",
            Self::Building => "building",
            Self::Testing => "testing",
            Self::Verifying => "verifying",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One auto-recovery attempt, kept in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub timestamp: DateTime<Utc>,
    pub reason: FailureReason,
    pub attempt_number: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Configuration for inserting a new execution record.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub id: String,
    pub branch: String,
    pub project: String,
    pub description: String,
    pub prd_path: PathBuf,
    pub project_root: PathBuf,
    pub priority: Priority,
    pub dependencies: Vec<String>,
    pub worktree_path: Option<PathBuf>,
    pub base_commit_sha: Option<String>,
}

impl ExecutionConfig {
    pub fn builder(
        id: impl Into<String>,
        branch: impl Into<String>,
        prd_path: impl Into<PathBuf>,
    ) -> ExecutionConfigBuilder {
        ExecutionConfigBuilder {
            config: ExecutionConfig {
                id: id.into(),
                branch: branch.into(),
                project: String::new(),
                description: String::new(),
                prd_path: prd_path.into(),
                project_root: PathBuf::new(),
                priority: Priority::default(),
                dependencies: Vec::new(),
                worktree_path: None,
                base_commit_sha: None,
            },
        }
    }
}

/// Fluent builder for [`ExecutionConfig`].
#[derive(Debug, Clone)]
pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.config.project = project.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.project_root = root.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn dependencies(mut self, deps: Vec<String>) -> Self {
        self.config.dependencies = deps;
        self
    }

    pub fn worktree_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.worktree_path = Some(path.into());
        self
    }

    pub fn base_commit_sha(mut self, sha: impl Into<String>) -> Self {
        self.config.base_commit_sha = Some(sha.into());
        self
    }

    pub fn build(self) -> ExecutionConfig {
        self.config
    }
}

/// The central entity tracked by the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    /// Unique among non-archived records for a given project root
    pub branch: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    pub prd_path: PathBuf,
    pub project_root: PathBuf,
    #[serde(default)]
    pub priority: Priority,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    /// Commit at creation; lets the reconciler tell "never advanced" from "merged"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub launch_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    #[serde(default)]
    pub recovery_count: u32,
    #[serde(default)]
    pub recovery_log: Vec<RecoveryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_commit_sha: Option<String>,
    /// Stagnation counters, zeroed by `reset_stagnation`
    #[serde(default)]
    pub consecutive_no_progress: u32,
    #[serde(default)]
    pub consecutive_errors: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Create a record from a parsed PRD. Starts `pending` when dependencies
    /// are declared, `ready` otherwise.
    pub fn new(config: ExecutionConfig, now: DateTime<Utc>) -> Self {
        let status = if config.dependencies.is_empty() {
            ExecutionStatus::Ready
        } else {
            ExecutionStatus::Pending
        };
        Self {
            id: ExecutionId::new(config.id),
            branch: config.branch,
            project: config.project,
            description: config.description,
            prd_path: config.prd_path,
            project_root: config.project_root,
            priority: config.priority,
            status,
            dependencies: config.dependencies,
            worktree_path: config.worktree_path,
            base_commit_sha: config.base_commit_sha,
            agent_task_id: None,
            agent_pid: None,
            launch_attempt_at: None,
            launch_attempts: 0,
            startup_confirmed_at: None,
            last_activity_at: None,
            health_status: None,
            recovery_count: 0,
            recovery_log: Vec::new(),
            current_step: None,
            log_path: None,
            last_error: None,
            reconcile_reason: None,
            merged_at: None,
            merge_commit_sha: None,
            consecutive_no_progress: 0,
            consecutive_errors: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sort key for the ready queue: priority dominates, FIFO breaks ties.
    pub fn schedule_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority.rank(), self.created_at)
    }
}

/// Accumulator of field updates applied by `StateStore::update_execution`.
///
/// `Some(...)` fields overwrite; optional record fields use a nested option
/// so a patch can distinguish "leave alone" from "clear".
#[derive(Debug, Default, Clone)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub agent_task_id: Option<Option<String>>,
    pub agent_pid: Option<Option<u32>>,
    pub worktree_path: Option<Option<PathBuf>>,
    pub base_commit_sha: Option<String>,
    pub launch_attempt_at: Option<DateTime<Utc>>,
    pub launch_attempts: Option<u32>,
    pub startup_confirmed_at: Option<Option<DateTime<Utc>>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub health_status: Option<Option<HealthStatus>>,
    pub current_step: Option<String>,
    pub log_path: Option<Option<PathBuf>>,
    pub last_error: Option<Option<String>>,
    pub reconcile_reason: Option<FailureReason>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit_sha: Option<String>,
    pub consecutive_no_progress: Option<u32>,
    pub consecutive_errors: Option<u32>,
    pub push_recovery: Option<RecoveryEntry>,
    /// Leave `updated_at` untouched. Monitor label writes must not
    /// register as agent activity, or staleness could never trigger.
    pub preserve_updated_at: bool,
}

impl ExecutionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn agent(mut self, task_id: impl Into<String>, pid: Option<u32>) -> Self {
        self.agent_task_id = Some(Some(task_id.into()));
        self.agent_pid = Some(pid);
        self
    }

    /// Clear agent identity plus startup/health bookkeeping (recovery path).
    pub fn clear_agent(mut self) -> Self {
        self.agent_task_id = Some(None);
        self.agent_pid = Some(None);
        self.startup_confirmed_at = Some(None);
        self.health_status = Some(None);
        self
    }

    pub fn worktree_path(mut self, path: Option<PathBuf>) -> Self {
        self.worktree_path = Some(path);
        self
    }

    pub fn launch_attempt(mut self, at: DateTime<Utc>, attempts: u32) -> Self {
        self.launch_attempt_at = Some(at);
        self.launch_attempts = Some(attempts);
        self
    }

    pub fn launch_attempts(mut self, attempts: u32) -> Self {
        self.launch_attempts = Some(attempts);
        self
    }

    pub fn startup_confirmed_at(mut self, at: DateTime<Utc>) -> Self {
        self.startup_confirmed_at = Some(Some(at));
        self
    }

    pub fn last_activity_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(at);
        self
    }

    pub fn health_status(mut self, health: HealthStatus) -> Self {
        self.health_status = Some(Some(health));
        self
    }

    pub fn current_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn clear_last_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn reconcile_reason(mut self, reason: FailureReason) -> Self {
        self.reconcile_reason = Some(reason);
        self
    }

    pub fn merged(mut self, at: DateTime<Utc>, commit_sha: impl Into<String>) -> Self {
        self.merged_at = Some(at);
        self.merge_commit_sha = Some(commit_sha.into());
        self
    }

    pub fn push_recovery(mut self, entry: RecoveryEntry) -> Self {
        self.push_recovery = Some(entry);
        self
    }

    pub fn preserve_updated_at(mut self) -> Self {
        self.preserve_updated_at = true;
        self
    }

    pub fn reset_stagnation(mut self) -> Self {
        self.consecutive_no_progress = Some(0);
        self.consecutive_errors = Some(0);
        self.last_error = Some(None);
        self
    }

    /// Apply the accumulated updates to a record, bumping `updated_at` and
    /// keeping `recovery_count` equal to the recovery log length.
    pub fn apply(&self, record: &mut ExecutionRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref v) = self.agent_task_id {
            record.agent_task_id = v.clone();
        }
        if let Some(v) = self.agent_pid {
            record.agent_pid = v;
        }
        if let Some(ref v) = self.worktree_path {
            record.worktree_path = v.clone();
        }
        if let Some(ref v) = self.base_commit_sha {
            record.base_commit_sha = Some(v.clone());
        }
        if let Some(v) = self.launch_attempt_at {
            record.launch_attempt_at = Some(v);
        }
        if let Some(v) = self.launch_attempts {
            record.launch_attempts = v;
        }
        if let Some(v) = self.startup_confirmed_at {
            record.startup_confirmed_at = v;
        }
        if let Some(v) = self.last_activity_at {
            record.last_activity_at = Some(v);
        }
        if let Some(v) = self.health_status {
            record.health_status = v;
        }
        if let Some(ref v) = self.current_step {
            record.current_step = Some(v.clone());
        }
        if let Some(ref v) = self.log_path {
            record.log_path = v.clone();
        }
        if let Some(ref v) = self.last_error {
            record.last_error = v.clone();
        }
        if let Some(v) = self.reconcile_reason {
            record.reconcile_reason = Some(v);
        }
        if let Some(v) = self.merged_at {
            record.merged_at = Some(v);
        }
        if let Some(ref v) = self.merge_commit_sha {
            record.merge_commit_sha = Some(v.clone());
        }
        if let Some(v) = self.consecutive_no_progress {
            record.consecutive_no_progress = v;
        }
        if let Some(v) = self.consecutive_errors {
            record.consecutive_errors = v;
        }
        if let Some(ref entry) = self.push_recovery {
            record.recovery_log.push(entry.clone());
        }
        record.recovery_count = record.recovery_log.len() as u32;
        if !self.preserve_updated_at {
            record.updated_at = now;
        }
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
