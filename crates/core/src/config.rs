// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner configuration singleton stored alongside executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default concurrency when the store has never been configured.
pub const DEFAULT_MAX_CONCURRENCY: u32 = 2;

/// Runtime-adjustable scheduler settings. The runner re-reads this every
/// poll tick, so `set_runner_max_concurrency` takes effect without restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub max_concurrency: u32,
    /// Rationale recorded with the last change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RunnerConfig {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            reason: None,
            updated_at: now,
        }
    }
}
