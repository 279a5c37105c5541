// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source-tree adapter.
//!
//! Every operation shells out to `git` with a caller-side timeout; the
//! reconciler and health monitor must never block on a wedged repository.

use crate::subprocess::{run_with_timeout, GIT_COMMAND_TIMEOUT, WORKTREE_REMOVE_TIMEOUT};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from source-tree operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    Command(String),
    #[error("worktree removal failed: {0}")]
    WorktreeRemove(String),
}

/// Narrow contract the reconciler and health monitor consume.
#[async_trait]
pub trait GitAdapter: Send + Sync {
    /// Whether `branch` exists in the repository.
    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError>;

    /// Commit id at the tip of `branch`, if the branch exists.
    async fn branch_head(&self, repo: &Path, branch: &str) -> Result<Option<String>, GitError>;

    /// Whether `branch` is an ancestor of the canonical main branch.
    async fn is_branch_merged(&self, repo: &Path, branch: &str) -> Result<bool, GitError>;

    /// Commit time (epoch ms) at the tip of `branch`.
    async fn head_commit_epoch_ms(
        &self,
        repo: &Path,
        branch: &str,
    ) -> Result<Option<u64>, GitError>;

    /// Subject line of the latest commit on `branch`.
    async fn latest_commit_message(
        &self,
        repo: &Path,
        branch: &str,
    ) -> Result<Option<String>, GitError>;

    /// Unregister and delete a worktree directory.
    async fn remove_worktree(&self, repo: &Path, worktree: &Path) -> Result<(), GitError>;
}

/// Production adapter backed by the `git` CLI.
#[derive(Debug, Clone, Default)]
pub struct CliGit;

impl CliGit {
    pub fn new() -> Self {
        Self
    }

    fn git(repo: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(repo);
        cmd
    }

    /// Resolve the canonical main ref: `origin/main`, then `main`, then
    /// `master`.
    async fn main_ref(&self, repo: &Path) -> Result<String, GitError> {
        for candidate in ["origin/main", "main", "master"] {
            let mut cmd = Self::git(repo);
            cmd.args(["rev-parse", "--verify", "--quiet", candidate]);
            let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git rev-parse")
                .await
                .map_err(GitError::Command)?;
            if output.status.success() {
                return Ok(candidate.to_string());
            }
        }
        Err(GitError::Command("no main branch found".to_string()))
    }
}

#[async_trait]
impl GitAdapter for CliGit {
    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let ref_name = format!("refs/heads/{branch}");
        let mut cmd = Self::git(repo);
        cmd.args(["rev-parse", "--verify", "--quiet", ref_name.as_str()]);
        let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git rev-parse")
            .await
            .map_err(GitError::Command)?;
        Ok(output.status.success())
    }

    async fn branch_head(&self, repo: &Path, branch: &str) -> Result<Option<String>, GitError> {
        let ref_name = format!("refs/heads/{branch}");
        let mut cmd = Self::git(repo);
        cmd.args(["rev-parse", "--verify", "--quiet", ref_name.as_str()]);
        let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git rev-parse")
            .await
            .map_err(GitError::Command)?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    async fn is_branch_merged(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let main_ref = self.main_ref(repo).await?;
        let mut cmd = Self::git(repo);
        cmd.args(["merge-base", "--is-ancestor", branch, main_ref.as_str()]);
        let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git merge-base")
            .await
            .map_err(GitError::Command)?;
        // Exit 0 = ancestor, 1 = not an ancestor, anything else is an error
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    async fn head_commit_epoch_ms(
        &self,
        repo: &Path,
        branch: &str,
    ) -> Result<Option<u64>, GitError> {
        let mut cmd = Self::git(repo);
        cmd.args(["log", "-1", "--format=%ct", branch]);
        let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git log")
            .await
            .map_err(GitError::Command)?;
        if !output.status.success() {
            return Ok(None);
        }
        let seconds: Option<u64> = String::from_utf8_lossy(&output.stdout).trim().parse().ok();
        Ok(seconds.map(|s| s * 1000))
    }

    async fn latest_commit_message(
        &self,
        repo: &Path,
        branch: &str,
    ) -> Result<Option<String>, GitError> {
        let mut cmd = Self::git(repo);
        cmd.args(["log", "-1", "--format=%s", branch]);
        let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git log")
            .await
            .map_err(GitError::Command)?;
        if !output.status.success() {
            return Ok(None);
        }
        let subject = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!subject.is_empty()).then_some(subject))
    }

    async fn remove_worktree(&self, repo: &Path, worktree: &Path) -> Result<(), GitError> {
        let mut cmd = Self::git(repo);
        cmd.args(["worktree", "remove", "--force"]);
        cmd.arg(worktree);
        let output = run_with_timeout(cmd, WORKTREE_REMOVE_TIMEOUT, "git worktree remove")
            .await
            .map_err(GitError::WorktreeRemove)?;
        if !output.status.success() {
            debug!(
                worktree = %worktree.display(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "git worktree remove failed, deleting directory directly"
            );
        }

        // Remove remnants either way
        if worktree.exists() {
            tokio::fs::remove_dir_all(worktree)
                .await
                .map_err(|e| GitError::WorktreeRemove(e.to_string()))?;
        }
        Ok(())
    }
}

/// Scriptable in-memory adapter for engine tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default, Clone)]
pub struct FakeGit {
    inner: std::sync::Arc<parking_lot::Mutex<FakeGitState>>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
struct FakeGitState {
    branches: std::collections::HashMap<String, FakeBranch>,
    removed_worktrees: Vec<std::path::PathBuf>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, Default)]
struct FakeBranch {
    head: String,
    merged: bool,
    commit_epoch_ms: Option<u64>,
    commit_message: Option<String>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_branch(&self, branch: &str, head: &str) {
        self.inner.lock().branches.insert(
            branch.to_string(),
            FakeBranch {
                head: head.to_string(),
                ..FakeBranch::default()
            },
        );
    }

    pub fn set_merged(&self, branch: &str, merged: bool) {
        if let Some(b) = self.inner.lock().branches.get_mut(branch) {
            b.merged = merged;
        }
    }

    pub fn set_commit(&self, branch: &str, epoch_ms: u64, message: &str) {
        if let Some(b) = self.inner.lock().branches.get_mut(branch) {
            b.commit_epoch_ms = Some(epoch_ms);
            b.commit_message = Some(message.to_string());
        }
    }

    pub fn delete_branch(&self, branch: &str) {
        self.inner.lock().branches.remove(branch);
    }

    pub fn removed_worktrees(&self) -> Vec<std::path::PathBuf> {
        self.inner.lock().removed_worktrees.clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl GitAdapter for FakeGit {
    async fn branch_exists(&self, _repo: &Path, branch: &str) -> Result<bool, GitError> {
        Ok(self.inner.lock().branches.contains_key(branch))
    }

    async fn branch_head(&self, _repo: &Path, branch: &str) -> Result<Option<String>, GitError> {
        Ok(self.inner.lock().branches.get(branch).map(|b| b.head.clone()))
    }

    async fn is_branch_merged(&self, _repo: &Path, branch: &str) -> Result<bool, GitError> {
        Ok(self
            .inner
            .lock()
            .branches
            .get(branch)
            .is_some_and(|b| b.merged))
    }

    async fn head_commit_epoch_ms(
        &self,
        _repo: &Path,
        branch: &str,
    ) -> Result<Option<u64>, GitError> {
        Ok(self
            .inner
            .lock()
            .branches
            .get(branch)
            .and_then(|b| b.commit_epoch_ms))
    }

    async fn latest_commit_message(
        &self,
        _repo: &Path,
        branch: &str,
    ) -> Result<Option<String>, GitError> {
        Ok(self
            .inner
            .lock()
            .branches
            .get(branch)
            .and_then(|b| b.commit_message.clone()))
    }

    async fn remove_worktree(&self, _repo: &Path, worktree: &Path) -> Result<(), GitError> {
        self.inner
            .lock()
            .removed_worktrees
            .push(worktree.to_path_buf());
        Ok(())
    }
}
