// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closed taxonomy of detected failure causes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an execution left the happy path.
///
/// Consumed by the recovery policy and recorded as `reconcile_reason` on
/// reconciler-driven corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Agent process no longer exists
    ProcessExit,
    /// Health monitor classified the execution stale
    Stale,
    /// No post-launch activity within the startup window
    StartupFailure,
    /// Launcher returned an error or timed out
    LaunchError,
    /// Branch no longer exists in the source tree
    BranchDeleted,
    /// Branch observed merged into the main branch
    BranchMerged,
    /// Worktree directory missing while running
    WorktreeMissing,
}

impl FailureReason {
    /// Reasons the recovery policy may retry; the rest are reconciler
    /// dispositions that archive the record directly.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::ProcessExit | Self::Stale | Self::StartupFailure | Self::LaunchError
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProcessExit => "process_exit",
            Self::Stale => "stale",
            Self::StartupFailure => "startup_failure",
            Self::LaunchError => "launch_error",
            Self::BranchDeleted => "branch_deleted",
            Self::BranchMerged => "branch_merged",
            Self::WorktreeMissing => "worktree_missing",
        };
        write!(f, "{s}")
    }
}
