// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stale-safe advisory lock file for the state document.
//!
//! Writers serialize through `state.lock`. The file holds the owner PID and
//! a refreshed-at timestamp; a lock whose timestamp is older than
//! [`LOCK_STALE_AFTER`] is reclaimable, so a crashed writer can never wedge
//! the store. Holders of long-running sections call
//! [`StoreLockGuard::refresh`] on a [`LOCK_REFRESH_INTERVAL`] cadence.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Age beyond which a lock is considered abandoned and reclaimable.
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// How often a long-held lock should be refreshed.
pub const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("store lock held by pid {pid} (refreshed {age_ms} ms ago)")]
    Busy { pid: u32, age_ms: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of the lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    refreshed_at_ms: u64,
}

/// Factory for acquiring the store lock.
#[derive(Debug, Clone)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to acquire the lock at `now_ms` (epoch milliseconds).
    ///
    /// A stale lock file is reclaimed with a warning; a fresh one returns
    /// [`LockError::Busy`]. At most one reclaim attempt is made, so two
    /// racing reclaimers resolve to a single winner.
    pub fn acquire(&self, now_ms: u64) -> Result<StoreLockGuard, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        for attempt in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        refreshed_at_ms: now_ms,
                    };
                    let json = serde_json::to_string(&info).map_err(std::io::Error::other)?;
                    file.write_all(json.as_bytes())?;
                    file.sync_all()?;
                    return Ok(StoreLockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = read_lock_info(&self.path);
                    let age_ms = holder
                        .as_ref()
                        .map(|info| now_ms.saturating_sub(info.refreshed_at_ms));

                    match age_ms {
                        // Unreadable or ancient: reclaim once and retry
                        Some(age) if age > LOCK_STALE_AFTER.as_millis() as u64 => {
                            if attempt == 0 {
                                warn!(
                                    path = %self.path.display(),
                                    age_ms = age,
                                    "reclaiming stale store lock"
                                );
                                let _ = fs::remove_file(&self.path);
                                continue;
                            }
                            return Err(LockError::Busy {
                                pid: holder.map(|i| i.pid).unwrap_or(0),
                                age_ms: age,
                            });
                        }
                        Some(age) => {
                            return Err(LockError::Busy {
                                pid: holder.map(|i| i.pid).unwrap_or(0),
                                age_ms: age,
                            });
                        }
                        None => {
                            // Unparseable lock file counts as abandoned
                            if attempt == 0 {
                                warn!(
                                    path = %self.path.display(),
                                    "reclaiming unreadable store lock"
                                );
                                let _ = fs::remove_file(&self.path);
                                continue;
                            }
                            return Err(LockError::Busy { pid: 0, age_ms: 0 });
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LockError::Busy { pid: 0, age_ms: 0 })
    }
}

fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Held store lock; removes the lock file on drop.
#[derive(Debug)]
pub struct StoreLockGuard {
    path: PathBuf,
}

impl StoreLockGuard {
    /// Re-stamp the lock so other writers keep treating it as live.
    pub fn refresh(&self, now_ms: u64) -> Result<(), LockError> {
        let info = LockInfo {
            pid: std::process::id(),
            refreshed_at_ms: now_ms,
        };
        let json = serde_json::to_string(&info).map_err(std::io::Error::other)?;
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove store lock");
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
