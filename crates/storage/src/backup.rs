// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rotating timestamped backups of the state document.
//!
//! Backups are named `state.json.backup-<RFC3339>`; lexical order is
//! chronological order, so pruning keeps the newest `retain` files.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default number of backups to keep.
const DEFAULT_RETAIN: usize = 10;

/// Default minimum spacing between backups.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Retention policy for periodic document backups.
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    retain: usize,
    min_interval: Duration,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            retain: DEFAULT_RETAIN,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl BackupPolicy {
    pub fn new(retain: usize, min_interval: Duration) -> Self {
        Self {
            retain,
            min_interval,
        }
    }

    /// Copy `state_path` to a timestamped backup if the newest backup is
    /// older than the minimum interval. Best-effort: failures are logged,
    /// never surfaced, so a full disk cannot block state writes.
    pub fn backup_if_due(&self, state_path: &Path, now: DateTime<Utc>) {
        if !state_path.exists() {
            return;
        }

        let backups = self.list_backups(state_path);
        if let Some(newest) = backups.last().and_then(|p| backup_timestamp(p)) {
            let elapsed = now.signed_duration_since(newest);
            if elapsed.num_milliseconds() >= 0
                && (elapsed.num_milliseconds() as u128) < self.min_interval.as_millis()
            {
                return;
            }
        }

        let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let backup_path = backup_file_path(state_path, &stamp);
        if let Err(e) = fs::copy(state_path, &backup_path) {
            warn!(path = %backup_path.display(), error = %e, "state backup failed");
            return;
        }

        self.prune(state_path);
    }

    /// Remove oldest backups beyond the retention count.
    fn prune(&self, state_path: &Path) {
        let backups = self.list_backups(state_path);
        if backups.len() <= self.retain {
            return;
        }
        for old in &backups[..backups.len() - self.retain] {
            if let Err(e) = fs::remove_file(old) {
                warn!(path = %old.display(), error = %e, "failed to prune backup");
            }
        }
    }

    /// All backups for `state_path`, sorted oldest first.
    pub fn list_backups(&self, state_path: &Path) -> Vec<PathBuf> {
        let Some(dir) = state_path.parent() else {
            return Vec::new();
        };
        let prefix = backup_prefix(state_path);

        let mut backups: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        backups.sort();
        backups
    }
}

fn backup_prefix(state_path: &Path) -> String {
    let name = state_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state.json");
    format!("{name}.backup-")
}

fn backup_file_path(state_path: &Path, stamp: &str) -> PathBuf {
    let prefix = backup_prefix(state_path);
    match state_path.parent() {
        Some(dir) => dir.join(format!("{prefix}{stamp}")),
        None => PathBuf::from(format!("{prefix}{stamp}")),
    }
}

fn backup_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.rsplit("backup-").next()?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "backup_tests.rs"]
mod tests;
