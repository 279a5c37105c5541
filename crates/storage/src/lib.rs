// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ralph-storage: durable, lock-protected state store

mod backup;
mod document;
mod lock;
mod store;

pub use backup::BackupPolicy;
pub use document::{StateDocument, CURRENT_STATE_VERSION};
pub use lock::{LockError, StoreLock, StoreLockGuard, LOCK_REFRESH_INTERVAL, LOCK_STALE_AFTER};
pub use store::{ClaimOutcome, DependencyReport, StateStore, StoreError, UpdateOpts};
