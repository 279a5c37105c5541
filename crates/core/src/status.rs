// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an execution record through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Waiting on dependencies
    Pending,
    /// Eligible to be claimed by the scheduler
    Ready,
    /// Claimed; launch in progress
    Starting,
    /// Agent process launched and recorded
    Running,
    /// Health monitor or liveness probe declared the agent gone/stale
    Interrupted,
    /// All user stories pass
    Completed,
    /// Merge initiated
    Merging,
    /// Branch landed on the main branch
    Merged,
    /// Terminal failure (recovery exhausted, launch exhausted, merge failed)
    Failed,
    /// Operator stop
    Stopped,
}

impl ExecutionStatus {
    /// Terminal (non-archive) statuses: only operator actions or archival apply.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Stopped | Self::Failed)
    }

    /// Statuses that count against the concurrency budget.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Statuses that satisfy a dependency on this execution's branch.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Completed | Self::Merging | Self::Merged)
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// Operator stop is reachable from every state. Archival is not a
    /// transition and is handled by the store.
    pub fn can_transition_to(self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        if to == Stopped {
            return true;
        }

        matches!(
            (self, to),
            // Dependencies satisfied
            (Pending, Ready)
            // Claim succeeded
            | (Ready, Starting)
            // Launcher success / failure with budget / budget exhausted
            | (Starting, Running)
            | (Starting, Ready)
            | (Starting, Failed)
            // All stories pass / health interruption / recovery exhausted
            | (Running, Completed)
            | (Running, Interrupted)
            | (Running, Failed)
            // Auto-recovery
            | (Interrupted, Ready)
            // Manual retry
            | (Failed, Ready)
            // Merge lifecycle
            | (Completed, Merging)
            | (Merging, Merged)
            | (Merging, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
