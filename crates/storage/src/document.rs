// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The on-disk state document (`state.json`).
//!
//! A single JSON-shaped document holding every collection the store owns.
//! Loading verifies and upgrades the schema version; a document that fails
//! to parse is quarantined with a timestamped name rather than deleted.

use chrono::{SecondsFormat, Utc};
use ralph_core::{ExecutionRecord, MergeQueueItem, RunnerConfig, UserStory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Current document schema version.
pub const CURRENT_STATE_VERSION: u32 = 1;

/// In-place upgrade of a document object from one version to the next.
type UpgradeFn = fn(&mut serde_json::Map<String, Value>) -> Result<(), String>;

/// Upgrade table indexed by source version: entry `(n, f)` rewrites a
/// v`n` document into v`n+1`. Empty until a second document shape ships;
/// the loader walks it to step old files forward one version at a time.
const UPGRADES: &[(u32, UpgradeFn)] = &[];

/// Everything the store persists, in one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,
    #[serde(default)]
    pub user_stories: Vec<UserStory>,
    #[serde(default)]
    pub merge_queue: Vec<MergeQueueItem>,
    #[serde(default)]
    pub archived_executions: Vec<ExecutionRecord>,
    #[serde(default)]
    pub archived_user_stories: Vec<UserStory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_config: Option<RunnerConfig>,
}

impl StateDocument {
    pub fn empty() -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            executions: Vec::new(),
            user_stories: Vec::new(),
            merge_queue: Vec::new(),
            archived_executions: Vec::new(),
            archived_user_stories: Vec::new(),
            runner_config: None,
        }
    }

    /// Persist the document durably.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let bytes = serde_json::to_vec(self).map_err(std::io::Error::other)?;
        write_atomic(path, &bytes)
    }

    /// Load the document if present, stepping older schema versions
    /// forward.
    ///
    /// Returns `Ok(None)` when the file does not exist. A document that is
    /// not valid JSON is quarantined and reported as `None` so the caller
    /// can start fresh without destroying evidence.
    pub fn load(path: &Path) -> Result<Option<Self>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let value: Value = match serde_json::from_reader(BufReader::new(file)) {
            Ok(v) => v,
            Err(e) => {
                let quarantined = quarantine_corrupt(path)?;
                warn!(
                    error = %e,
                    path = %path.display(),
                    quarantined = %quarantined.display(),
                    "corrupt state document quarantined, starting fresh",
                );
                return Ok(None);
            }
        };

        let document = upgrade_document(value).map_err(std::io::Error::other)?;
        Ok(Some(document))
    }
}

/// Verify the schema version and apply any pending upgrades.
fn upgrade_document(value: Value) -> Result<StateDocument, String> {
    let mut object = match value {
        Value::Object(object) => object,
        other => return Err(format!("state document is not an object: {other}")),
    };

    // Documents written before the version field count as v1
    let mut version = object
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    if version > CURRENT_STATE_VERSION {
        return Err(format!(
            "state document version {version} is newer than this build supports ({CURRENT_STATE_VERSION})"
        ));
    }

    while version < CURRENT_STATE_VERSION {
        let upgrade = UPGRADES
            .iter()
            .find(|(from, _)| *from == version)
            .map(|(_, f)| f)
            .ok_or_else(|| format!("no upgrade path from document version {version}"))?;
        upgrade(&mut object).map_err(|e| format!("upgrade from v{version} failed: {e}"))?;
        version += 1;
    }

    // Stamp the resolved version so pre-version-field files deserialize
    object.insert("version".to_string(), version.into());
    serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())
}

/// Write bytes durably: temp file beside the target, fsync, rename over
/// it, then fsync the directory so the rename survives power loss.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let tmp_path = path.with_extension("tmp");
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(bytes)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;

    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// How many quarantined corrupt documents to keep.
const MAX_QUARANTINED: usize = 3;

/// Move an unreadable document aside as `<name>.corrupt-<RFC3339>`,
/// pruning older quarantined copies the same way `backup.rs` prunes
/// backups: lexical order is chronological order.
fn quarantine_corrupt(path: &Path) -> Result<PathBuf, std::io::Error> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state.json");
    let prefix = format!("{name}.corrupt-");
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut dest = dir.join(format!("{prefix}{stamp}"));
    // Two corruptions in the same millisecond still get distinct names
    for n in 2..10 {
        if !dest.exists() {
            break;
        }
        dest = dir.join(format!("{prefix}{stamp}.{n}"));
    }
    fs::rename(path, &dest)?;

    let mut quarantined: Vec<PathBuf> = fs::read_dir(&dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    quarantined.sort();
    if quarantined.len() > MAX_QUARANTINED {
        for old in &quarantined[..quarantined.len() - MAX_QUARANTINED] {
            if let Err(e) = fs::remove_file(old) {
                warn!(path = %old.display(), error = %e, "failed to prune quarantined document");
            }
        }
    }

    Ok(dest)
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
