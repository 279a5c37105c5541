// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner and health-monitor configuration.

use ralph_core::TaskType;
use std::time::Duration;

/// Memory headroom model for deriving a concurrency cap.
///
/// Constants are configuration, not hard-coded policy: embedding tools can
/// budget differently for heavier or lighter agents.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBudget {
    /// Memory left for the rest of the machine
    pub reserved_gb: f64,
    /// Expected footprint of one agent
    pub per_agent_gb: f64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            reserved_gb: 2.0,
            per_agent_gb: 0.8,
        }
    }
}

/// Health-monitor thresholds and adaptive stale timeouts.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// Below this idle time the execution is labeled `active`
    pub active_threshold: Duration,
    /// Below this idle time the execution is labeled `idle`
    pub at_risk_threshold: Duration,
    /// Below this idle time the execution is labeled `at_risk`
    pub stale_threshold: Duration,
    pub implementing_timeout: Duration,
    pub building_timeout: Duration,
    pub testing_timeout: Duration,
    pub verifying_timeout: Duration,
    pub unknown_timeout: Duration,
    /// Cap on worktree files sampled for mtime-based activity
    pub worktree_scan_limit: usize,
    /// Bounded read of the agent log tail for task-type inference
    pub log_tail_bytes: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            active_threshold: Duration::from_secs(30),
            at_risk_threshold: Duration::from_secs(5 * 60),
            stale_threshold: Duration::from_secs(15 * 60),
            implementing_timeout: Duration::from_secs(30 * 60),
            building_timeout: Duration::from_secs(60 * 60),
            testing_timeout: Duration::from_secs(60 * 60),
            verifying_timeout: Duration::from_secs(60 * 60),
            unknown_timeout: Duration::from_secs(20 * 60),
            worktree_scan_limit: 200,
            log_tail_bytes: 64 * 1024,
        }
    }
}

impl HealthSettings {
    /// Stale timeout for the inferred task type.
    pub fn adaptive_timeout(&self, task_type: TaskType) -> Duration {
        match task_type {
            TaskType::Implementing => self.implementing_timeout,
            TaskType::Building => self.building_timeout,
            TaskType::Testing => self.testing_timeout,
            TaskType::Verifying => self.verifying_timeout,
            TaskType::Unknown => self.unknown_timeout,
        }
    }
}

/// Scheduler settings, mostly fed from the CLI surface.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Poll tick interval
    pub poll_interval: Duration,
    /// Deadline for a single launch (claim through launcher resolution)
    pub launch_timeout: Duration,
    /// Window for first post-launch activity before `startup_failure`
    pub startup_timeout: Duration,
    /// Launch attempts before a `starting` record fails terminally
    pub max_retries: u32,
    /// Auto-recovery attempt budget
    pub max_recovery_attempts: u32,
    pub auto_recovery: bool,
    /// CLI-pinned concurrency; `None` means auto from the stored RunnerConfig
    pub configured_concurrency: Option<u32>,
    pub memory_budget: MemoryBudget,
    /// How long shutdown waits for in-flight launches to drain
    pub drain_grace: Duration,
    pub health: HealthSettings,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            launch_timeout: Duration::from_secs(60),
            startup_timeout: Duration::from_secs(120),
            max_retries: 3,
            max_recovery_attempts: 3,
            auto_recovery: true,
            configured_concurrency: None,
            memory_budget: MemoryBudget::default(),
            drain_grace: Duration::from_secs(10),
            health: HealthSettings::default(),
        }
    }
}
