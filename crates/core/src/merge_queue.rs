// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merge queue items, strict FIFO by position.

use crate::execution::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a merge queue item.
    pub struct MergeItemId;
}

/// Status of a merge queue item through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeItemStatus {
    Pending,
    Merging,
    Completed,
    Failed,
}

impl fmt::Display for MergeItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A single queued merge. References its execution by id only (weak
/// reference; the execution may be archived independently).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeQueueItem {
    pub id: MergeItemId,
    pub execution_id: ExecutionId,
    pub position: u32,
    pub status: MergeItemStatus,
    pub created_at: DateTime<Utc>,
}
