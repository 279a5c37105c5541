// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drift correction between stored state and external reality.
//!
//! Each poll tick cross-checks every active record against the source
//! tree, the worktree directory, and the agent process, and emits
//! corrective transitions. A pass over unchanged state performs no
//! mutations; corrections carry a `reconcile_reason` and bypass the
//! normal transition guard.

use crate::health::{mtime_utc, HealthMonitor, PROGRESS_ARTIFACT};
use crate::recovery::{RecoveryDecision, RecoveryPolicy};
use crate::EngineError;
use chrono::Duration as ChronoDuration;
use ralph_adapters::{pid_alive, GitAdapter};
use ralph_core::{
    Clock, ExecutionPatch, ExecutionRecord, ExecutionStatus, FailureReason, RunnerEvent,
};
use ralph_storage::{StateStore, UpdateOpts};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Grace past `launch_attempt_at` before `updated_at` advancement counts
/// as startup evidence (the claim itself bumps `updated_at`).
const STARTUP_ACTIVITY_BUFFER: Duration = Duration::from_secs(5);

const FORCED: UpdateOpts = UpdateOpts {
    skip_transition_validation: true,
};

/// Counters from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub examined: usize,
    pub corrections: usize,
}

/// Periodic cross-checker for active executions.
pub struct Reconciler<C: Clock> {
    store: Arc<StateStore<C>>,
    git: Arc<dyn GitAdapter>,
    health: HealthMonitor,
    recovery: RecoveryPolicy,
    startup_timeout: Duration,
    clock: C,
    events: mpsc::Sender<RunnerEvent>,
}

impl<C: Clock> Reconciler<C> {
    pub fn new(
        store: Arc<StateStore<C>>,
        git: Arc<dyn GitAdapter>,
        health: HealthMonitor,
        recovery: RecoveryPolicy,
        startup_timeout: Duration,
        clock: C,
        events: mpsc::Sender<RunnerEvent>,
    ) -> Self {
        Self {
            store,
            git,
            health,
            recovery,
            startup_timeout,
            clock,
            events,
        }
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.try_send(event);
    }

    /// Reconcile every running/failed record the scheduler is not
    /// actively launching. One bad record never stalls the rest.
    pub async fn run_pass(&self, skip_branches: &HashSet<String>) -> ReconcileStats {
        let records = match self.store.list_executions() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "reconcile: cannot read store");
                return ReconcileStats::default();
            }
        };

        let mut stats = ReconcileStats::default();
        for record in records.iter().filter(|r| {
            matches!(
                r.status,
                ExecutionStatus::Running | ExecutionStatus::Failed
            ) && !skip_branches.contains(&r.branch)
        }) {
            stats.examined += 1;
            match self.reconcile_record(record).await {
                Ok(true) => stats.corrections += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(id = %record.id, branch = %record.branch, error = %e, "reconcile failed for record");
                }
            }
        }
        stats
    }

    /// Returns true when a corrective mutation was applied.
    async fn reconcile_record(&self, record: &ExecutionRecord) -> Result<bool, EngineError> {
        // 1. Story-completion short-circuit
        if record.status == ExecutionStatus::Running {
            let stories = self.store.list_stories(record.id.as_str())?;
            if !stories.is_empty() && stories.iter().all(|s| s.passes) {
                info!(id = %record.id, "all stories pass, forcing completed");
                self.store.update_execution(
                    record.id.as_str(),
                    ExecutionPatch::new().status(ExecutionStatus::Completed),
                    FORCED,
                )?;
                self.emit(RunnerEvent::PrdCompleted {
                    id: record.id.clone(),
                    branch: record.branch.clone(),
                });
                return Ok(true);
            }
        }

        // 2. Source-tree checks
        let head = self
            .git
            .branch_head(&record.project_root, &record.branch)
            .await?;
        let Some(head) = head else {
            return self.dispose(record, FailureReason::BranchDeleted, "branch was deleted");
        };

        // The base-commit guard: a branch whose HEAD still equals its fork
        // point has no work on it and cannot have been merged.
        let advanced = record.base_commit_sha.as_deref() != Some(head.as_str());
        if advanced
            && self
                .git
                .is_branch_merged(&record.project_root, &record.branch)
                .await?
        {
            info!(id = %record.id, branch = %record.branch, "branch merged, archiving");
            self.store.update_execution(
                record.id.as_str(),
                ExecutionPatch::new()
                    .status(ExecutionStatus::Merged)
                    .reconcile_reason(FailureReason::BranchMerged)
                    .merged(self.clock.now_utc(), head),
                FORCED,
            )?;
            if let Some(worktree) = &record.worktree_path {
                if let Err(e) = self.git.remove_worktree(&record.project_root, worktree).await {
                    warn!(worktree = %worktree.display(), error = %e, "worktree removal failed");
                }
            }
            self.store.archive_execution(record.id.as_str())?;
            return Ok(true);
        }

        // Failed records only get source-tree dispositions
        if record.status == ExecutionStatus::Failed {
            return Ok(false);
        }

        if let Some(worktree) = &record.worktree_path {
            if !worktree.exists() {
                return self.dispose(
                    record,
                    FailureReason::WorktreeMissing,
                    "worktree directory missing",
                );
            }
        }

        // 3. Process liveness
        if let Some(pid) = record.agent_pid {
            if !pid_alive(pid) {
                return self
                    .enter_recovery(record, FailureReason::ProcessExit, "agent process exited");
            }
        }

        // 4. Startup confirmation
        if record.startup_confirmed_at.is_none() {
            if let Some(attempt_at) = record.launch_attempt_at {
                let now = self.clock.now_utc();
                let progress_seen = record
                    .worktree_path
                    .as_ref()
                    .and_then(|wt| mtime_utc(&wt.join(PROGRESS_ARTIFACT)))
                    .is_some_and(|ts| ts > attempt_at);
                let store_seen = record.updated_at
                    > attempt_at
                        + ChronoDuration::milliseconds(STARTUP_ACTIVITY_BUFFER.as_millis() as i64);

                if progress_seen || store_seen {
                    self.store.update_execution(
                        record.id.as_str(),
                        ExecutionPatch::new().startup_confirmed_at(now),
                        UpdateOpts::default(),
                    )?;
                    return Ok(true);
                }

                let waited = (now - attempt_at).to_std().unwrap_or(Duration::ZERO);
                if waited > self.startup_timeout {
                    return self.enter_recovery(
                        record,
                        FailureReason::StartupFailure,
                        "startup never confirmed",
                    );
                }
                // Within the startup window; staleness cannot trigger yet
                return Ok(false);
            }
        }

        // 5. Staleness evaluation
        let now = self.clock.now_utc();
        let report = self.health.assess(record, self.git.as_ref(), now).await;

        if report.health == ralph_core::HealthStatus::Stale {
            return self.enter_recovery(
                record,
                FailureReason::Stale,
                &format!(
                    "no activity for {}s (task type {})",
                    report.idle.as_secs(),
                    report.task_type
                ),
            );
        }

        // Persist the label only when it changed; a pass over unchanged
        // state must not mutate.
        if record.health_status != Some(report.health)
            || record.last_activity_at != Some(report.last_activity)
        {
            self.store.update_execution(
                record.id.as_str(),
                ExecutionPatch::new()
                    .health_status(report.health)
                    .last_activity_at(report.last_activity)
                    .preserve_updated_at(),
                UpdateOpts::default(),
            )?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Terminal reconciler disposition: mark failed, archive, notify.
    fn dispose(
        &self,
        record: &ExecutionRecord,
        reason: FailureReason,
        error: &str,
    ) -> Result<bool, EngineError> {
        info!(id = %record.id, branch = %record.branch, %reason, "reconciler disposing record");
        self.store.update_execution(
            record.id.as_str(),
            ExecutionPatch::new()
                .status(ExecutionStatus::Failed)
                .reconcile_reason(reason)
                .last_error(error)
                .clear_agent(),
            FORCED,
        )?;
        self.store.archive_execution(record.id.as_str())?;
        self.emit(RunnerEvent::PrdFailed {
            id: record.id.clone(),
            branch: record.branch.clone(),
            error: error.to_string(),
        });
        Ok(true)
    }

    /// Route a detected failure through the recovery policy.
    fn enter_recovery(
        &self,
        record: &ExecutionRecord,
        reason: FailureReason,
        error: &str,
    ) -> Result<bool, EngineError> {
        let now = self.clock.now_utc();
        match self.recovery.decide(record, reason, error, now) {
            RecoveryDecision::Interrupt { entry } => {
                info!(
                    id = %record.id,
                    %reason,
                    attempt = entry.attempt_number,
                    "interrupting for auto-recovery"
                );
                self.store.update_execution(
                    record.id.as_str(),
                    ExecutionPatch::new()
                        .status(ExecutionStatus::Interrupted)
                        .reconcile_reason(reason)
                        .last_error(error)
                        .clear_agent()
                        .push_recovery(entry),
                    FORCED,
                )?;
            }
            RecoveryDecision::Fail { entry, annotation } => {
                warn!(id = %record.id, %reason, annotation, "recovery exhausted, failing");
                let annotated = format!("{error}: {annotation}");
                self.store.update_execution(
                    record.id.as_str(),
                    ExecutionPatch::new()
                        .status(ExecutionStatus::Failed)
                        .reconcile_reason(reason)
                        .last_error(annotated.clone())
                        .clear_agent()
                        .push_recovery(entry),
                    FORCED,
                )?;
                self.emit(RunnerEvent::PrdFailed {
                    id: record.id.clone(),
                    branch: record.branch.clone(),
                    error: annotated,
                });
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
