// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error type

use thiserror::Error;

/// Errors surfaced by engine operations. Per-record faults inside a poll
/// tick are logged and swallowed at the tick boundary; these variants
/// cover the paths that must propagate to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] ralph_storage::StoreError),

    #[error("git error: {0}")]
    Git(#[from] ralph_adapters::GitError),

    #[error("launch error: {0}")]
    Launch(String),
}
