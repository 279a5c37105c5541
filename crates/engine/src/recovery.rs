// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-recovery policy.
//!
//! Turns a detected failure into either an interruption (to be retried by
//! the scheduler's next tick) or a terminal failure, bounded by the
//! recovery attempt budget. Launch-time failures that never reached
//! `running` take the simpler retry branch in the launch routine.

use chrono::{DateTime, Utc};
use ralph_core::{ExecutionRecord, FailureReason, RecoveryEntry};

/// What to do about a detected failure.
#[derive(Debug, Clone)]
pub enum RecoveryDecision {
    /// Budget remains: interrupt now, the scheduler re-readies next tick
    Interrupt { entry: RecoveryEntry },
    /// Budget exhausted or auto-recovery disabled: fail terminally
    Fail {
        entry: RecoveryEntry,
        annotation: &'static str,
    },
}

/// Bounded auto-recovery rules.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub auto_recovery: bool,
    pub max_recovery_attempts: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            max_recovery_attempts: 3,
        }
    }
}

impl RecoveryPolicy {
    /// Decide the disposition for a failure detected on `record`.
    pub fn decide(
        &self,
        record: &ExecutionRecord,
        reason: FailureReason,
        error: &str,
        now: DateTime<Utc>,
    ) -> RecoveryDecision {
        let attempt_number = record.recovery_count + 1;

        if self.auto_recovery && attempt_number <= self.max_recovery_attempts {
            RecoveryDecision::Interrupt {
                entry: RecoveryEntry {
                    timestamp: now,
                    reason,
                    attempt_number,
                    success: true,
                    error: Some(error.to_string()),
                },
            }
        } else {
            let annotation = if self.auto_recovery {
                "max recovery attempts exceeded"
            } else {
                "auto recovery disabled"
            };
            RecoveryDecision::Fail {
                entry: RecoveryEntry {
                    timestamp: now,
                    reason,
                    attempt_number,
                    success: false,
                    error: Some(error.to_string()),
                },
                annotation,
            }
        }
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
