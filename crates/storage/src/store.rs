// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The state store: single-writer, crash-safe repository of execution
//! records, user stories, merge-queue items, and runner configuration.
//!
//! Every mutation acquires the advisory lock, reads the document, applies
//! the change in memory, writes atomically, then releases the lock. Readers
//! parse the document without the lock and may observe a slightly stale
//! snapshot, which the polling runner tolerates by re-reading each tick.

use crate::backup::BackupPolicy;
use crate::document::StateDocument;
use crate::lock::{LockError, StoreLock, StoreLockGuard};
use ralph_core::{
    Clock, ExecutionId, ExecutionPatch, ExecutionRecord, ExecutionStatus, MergeItemId,
    MergeItemStatus, MergeQueueItem, RunnerConfig, StoryId, SystemClock, UserStory,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock contention: another writer holds the store lock
    #[error("store busy: {0}")]
    Busy(String),

    /// Caller attempted an illegal status change; nothing was mutated
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("branch already has a non-archived execution: {0}")]
    BranchExists(String),

    #[error("cannot archive {id}: status {status} is not terminal")]
    NotTerminal {
        id: String,
        status: ExecutionStatus,
    },

    /// IO failure; the caller must not assume the patch was applied
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
}

impl From<LockError> for StoreError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy { .. } => StoreError::Busy(e.to_string()),
            LockError::Io(io) => StoreError::Unavailable(io),
        }
    }
}

/// Options for `update_execution`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOpts {
    /// Bypass the transition table. Permitted only for reconciler-driven
    /// corrections, which record a `reconcile_reason` on the patch.
    pub skip_transition_validation: bool,
}

/// Result of a claim attempt (§ claim operation).
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub success: bool,
    pub execution: Option<ExecutionRecord>,
    pub error: Option<String>,
}

impl ClaimOutcome {
    fn claimed(execution: ExecutionRecord) -> Self {
        Self {
            success: true,
            execution: Some(execution),
            error: None,
        }
    }

    fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            execution: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a dependency check.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyReport {
    pub satisfied: bool,
    /// Unsatisfied dependencies, in input order
    pub pending: Vec<String>,
    pub completed: Vec<String>,
}

/// Durable state store rooted at a data directory.
pub struct StateStore<C: Clock = SystemClock> {
    state_path: PathBuf,
    lock: StoreLock,
    backups: BackupPolicy,
    clock: C,
    /// How long a writer waits on lock contention before giving up
    lock_wait: std::time::Duration,
}

impl StateStore<SystemClock> {
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(data_dir, SystemClock)
    }
}

impl<C: Clock> StateStore<C> {
    pub fn with_clock(data_dir: impl Into<PathBuf>, clock: C) -> Self {
        let data_dir = data_dir.into();
        Self {
            state_path: data_dir.join("state.json"),
            lock: StoreLock::new(data_dir.join("state.lock")),
            backups: BackupPolicy::default(),
            clock,
            lock_wait: std::time::Duration::from_secs(2),
        }
    }

    pub fn with_backup_policy(mut self, backups: BackupPolicy) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_lock_wait(mut self, wait: std::time::Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Lock-free read of the current document (empty if none exists yet).
    fn read_document(&self) -> Result<StateDocument, StoreError> {
        Ok(StateDocument::load(&self.state_path)?.unwrap_or_else(StateDocument::empty))
    }

    /// Acquire the store lock, retrying briefly on contention so concurrent
    /// writers serialize instead of failing fast.
    fn acquire_lock(&self) -> Result<StoreLockGuard, StoreError> {
        let deadline = std::time::Instant::now() + self.lock_wait;
        loop {
            match self.lock.acquire(self.clock.epoch_ms()) {
                Ok(guard) => return Ok(guard),
                Err(LockError::Busy { .. }) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run a mutation under the store lock with read-modify-write-persist.
    fn with_document_mut<T>(
        &self,
        f: impl FnOnce(&mut StateDocument, chrono::DateTime<chrono::Utc>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.acquire_lock()?;
        let mut document = self.read_document()?;
        let now = self.clock.now_utc();

        let result = f(&mut document, now)?;

        document.save(&self.state_path)?;
        self.backups.backup_if_due(&self.state_path, now);
        drop(guard);
        Ok(result)
    }

    // === Execution queries ===

    pub fn list_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self.read_document()?.executions)
    }

    pub fn list_archived_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self.read_document()?.archived_executions)
    }

    pub fn find_execution_by_branch(
        &self,
        branch: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .read_document()?
            .executions
            .into_iter()
            .find(|r| r.branch == branch))
    }

    pub fn find_execution_by_id(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .read_document()?
            .executions
            .into_iter()
            .find(|r| r.id == id))
    }

    // === Execution mutations ===

    /// Insert a new record. Fails when the branch collides with another
    /// non-archived record for the same project root.
    pub fn insert_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.with_document_mut(|doc, _now| {
            let collision = doc
                .executions
                .iter()
                .any(|r| r.branch == record.branch && r.project_root == record.project_root);
            if collision {
                return Err(StoreError::BranchExists(record.branch.clone()));
            }
            info!(id = %record.id, branch = %record.branch, status = %record.status, "inserting execution");
            doc.executions.push(record);
            Ok(())
        })
    }

    /// Apply a patch to a record. Status changes are validated against the
    /// transition table unless `opts.skip_transition_validation` is set;
    /// same-status patches are treated as no-op writes and always allowed.
    pub fn update_execution(
        &self,
        id: &str,
        patch: ExecutionPatch,
        opts: UpdateOpts,
    ) -> Result<ExecutionRecord, StoreError> {
        self.with_document_mut(|doc, now| {
            let record = doc
                .executions
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            if let Some(to) = patch.status {
                let from = record.status;
                let legal = from == to || from.can_transition_to(to);
                if !legal && !opts.skip_transition_validation {
                    return Err(StoreError::InvalidTransition {
                        id: id.to_string(),
                        from,
                        to,
                    });
                }
                if from != to {
                    debug!(id, %from, %to, forced = opts.skip_transition_validation, "status transition");
                }
            }

            patch.apply(record, now);
            Ok(record.clone())
        })
    }

    /// Move a terminal record (and its stories) to the archive.
    pub fn archive_execution(&self, id: &str) -> Result<(), StoreError> {
        self.with_document_mut(|doc, _now| {
            let idx = doc
                .executions
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let status = doc.executions[idx].status;
            if !status.is_terminal() {
                return Err(StoreError::NotTerminal {
                    id: id.to_string(),
                    status,
                });
            }

            let record = doc.executions.remove(idx);
            info!(id = %record.id, branch = %record.branch, status = %record.status, "archiving execution");

            let (archived, kept): (Vec<UserStory>, Vec<UserStory>) = doc
                .user_stories
                .drain(..)
                .partition(|s| s.execution_id == record.id);
            doc.user_stories = kept;
            doc.archived_user_stories.extend(archived);
            doc.archived_executions.push(record);
            Ok(())
        })
    }

    /// Atomic compare-and-swap from `ready` to `starting`.
    ///
    /// Concurrent claims against the same branch are linearized by the
    /// store lock; exactly one succeeds and the rest observe `starting`.
    pub fn claim_ready_execution(&self, branch: &str) -> Result<ClaimOutcome, StoreError> {
        self.with_document_mut(|doc, now| {
            let record = doc
                .executions
                .iter_mut()
                .find(|r| r.branch == branch)
                .ok_or_else(|| StoreError::NotFound(branch.to_string()))?;

            if record.status != ExecutionStatus::Ready {
                return Ok(ClaimOutcome::rejected(format!(
                    "not ready: status is {}",
                    record.status
                )));
            }

            let attempts = record.launch_attempts + 1;
            ExecutionPatch::new()
                .status(ExecutionStatus::Starting)
                .launch_attempt(now, attempts)
                .apply(record, now);

            debug!(branch, attempts, "claimed execution");
            Ok(ClaimOutcome::claimed(record.clone()))
        })
    }

    /// Zero the stagnation counters and clear the last error.
    pub fn reset_stagnation(&self, id: &str) -> Result<(), StoreError> {
        self.with_document_mut(|doc, now| {
            let record = doc
                .executions
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            ExecutionPatch::new().reset_stagnation().apply(record, now);
            Ok(())
        })
    }

    // === Dependency resolution ===

    /// Check each dependency against store records and PRD front-matter.
    ///
    /// Satisfied when a non-archived execution on the branch has a
    /// dependency-satisfying status, an archived one finished successfully,
    /// or the dependency's PRD declares `status: completed`. Parse failures
    /// count as still-pending.
    pub fn are_dependencies_satisfied(
        &self,
        dependencies: &[String],
        project_root: &Path,
        prd_path: &Path,
    ) -> Result<DependencyReport, StoreError> {
        let doc = self.read_document()?;
        let mut pending = Vec::new();
        let mut completed = Vec::new();

        for dep in dependencies {
            if self.dependency_satisfied(&doc, dep, project_root, prd_path) {
                completed.push(dep.clone());
            } else {
                pending.push(dep.clone());
            }
        }

        Ok(DependencyReport {
            satisfied: pending.is_empty(),
            pending,
            completed,
        })
    }

    fn dependency_satisfied(
        &self,
        doc: &StateDocument,
        dependency: &str,
        project_root: &Path,
        prd_path: &Path,
    ) -> bool {
        // 1. Live execution on that branch finished successfully
        if let Some(record) = doc.executions.iter().find(|r| r.branch == dependency) {
            if record.status.satisfies_dependency() {
                return true;
            }
        }

        // 2. Most recent archived execution finished successfully
        let archived = doc
            .archived_executions
            .iter()
            .filter(|r| r.branch == dependency)
            .max_by_key(|r| r.updated_at);
        if let Some(record) = archived {
            if matches!(
                record.status,
                ExecutionStatus::Merged | ExecutionStatus::Completed
            ) {
                return true;
            }
        }

        // 3. PRD front-matter declares completion
        ralph_prd::dependency_declared_complete(dependency, prd_path, project_root)
    }

    // === Runner config ===

    pub fn get_runner_config(&self) -> Result<RunnerConfig, StoreError> {
        let doc = self.read_document()?;
        Ok(doc
            .runner_config
            .unwrap_or_else(|| RunnerConfig::new(self.clock.now_utc())))
    }

    pub fn set_runner_max_concurrency(
        &self,
        max_concurrency: u32,
        reason: Option<String>,
    ) -> Result<RunnerConfig, StoreError> {
        self.with_document_mut(|doc, now| {
            let config = RunnerConfig {
                max_concurrency,
                reason,
                updated_at: now,
            };
            doc.runner_config = Some(config.clone());
            info!(max_concurrency, "runner concurrency updated");
            Ok(config)
        })
    }

    // === Merge queue ===

    pub fn list_merge_queue(&self) -> Result<Vec<MergeQueueItem>, StoreError> {
        let mut items = self.read_document()?.merge_queue;
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    /// Append an execution to the back of the merge queue.
    pub fn insert_merge_queue_item(
        &self,
        id: impl Into<MergeItemId>,
        execution_id: impl Into<ExecutionId>,
    ) -> Result<MergeQueueItem, StoreError> {
        let id = id.into();
        let execution_id = execution_id.into();
        self.with_document_mut(|doc, now| {
            let position = doc
                .merge_queue
                .iter()
                .map(|i| i.position + 1)
                .max()
                .unwrap_or(0);
            let item = MergeQueueItem {
                id,
                execution_id,
                position,
                status: MergeItemStatus::Pending,
                created_at: now,
            };
            doc.merge_queue.push(item.clone());
            Ok(item)
        })
    }

    pub fn update_merge_queue_item(
        &self,
        id: &str,
        status: MergeItemStatus,
    ) -> Result<(), StoreError> {
        self.with_document_mut(|doc, _now| {
            let item = doc
                .merge_queue
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            item.status = status;
            Ok(())
        })
    }

    pub fn delete_merge_queue_by_execution_id(&self, execution_id: &str) -> Result<(), StoreError> {
        self.with_document_mut(|doc, _now| {
            doc.merge_queue.retain(|i| i.execution_id != execution_id);
            Ok(())
        })
    }

    // === User stories (written by the agent through the store) ===

    pub fn list_stories(&self, execution_id: &str) -> Result<Vec<UserStory>, StoreError> {
        Ok(self
            .read_document()?
            .user_stories
            .into_iter()
            .filter(|s| s.execution_id == execution_id)
            .collect())
    }

    /// Insert or replace a story, matched by `story_id`.
    pub fn upsert_story(&self, story: UserStory) -> Result<(), StoreError> {
        self.with_document_mut(|doc, _now| {
            if let Some(existing) = doc
                .user_stories
                .iter_mut()
                .find(|s| s.story_id == story.story_id)
            {
                *existing = story;
            } else {
                doc.user_stories.push(story);
            }
            Ok(())
        })
    }

    /// Record a story's pass/fail, bumping the owning execution's
    /// `updated_at` so the health monitor sees the activity.
    pub fn set_story_passes(
        &self,
        execution_id: &str,
        story_id: impl Into<StoryId>,
        passes: bool,
    ) -> Result<(), StoreError> {
        let story_id = story_id.into();
        self.with_document_mut(|doc, now| {
            let story = doc
                .user_stories
                .iter_mut()
                .find(|s| s.execution_id == execution_id && s.story_id == story_id)
                .ok_or_else(|| StoreError::NotFound(story_id.to_string()))?;
            story.passes = passes;

            if let Some(record) = doc.executions.iter_mut().find(|r| r.id == execution_id) {
                record.updated_at = now;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
