// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variable handling for the runner binary.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve the data directory.
///
/// `RALPH_DATA_DIR` takes priority (used by tests for isolation), then
/// `$XDG_STATE_HOME/ralph`, then `~/.local/state/ralph`.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("RALPH_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }

    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("ralph"));
    }

    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local/state/ralph"))
}

/// Whether the supervisor integration is enabled for embedding tools.
///
/// `RALPH_AUTO_RUNNER=false` disables it; those tools then emit agent
/// prompts directly instead of inserting work for the runner.
pub fn auto_runner_enabled() -> bool {
    match std::env::var("RALPH_AUTO_RUNNER") {
        Ok(value) => !value.eq_ignore_ascii_case("false"),
        Err(_) => true,
    }
}

/// Whether the parent-process watchdog is requested (`RALPH_PARENT_WATCHDOG=1`).
pub fn parent_watchdog_enabled() -> bool {
    std::env::var("RALPH_PARENT_WATCHDOG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Heartbeat gap that triggers a watchdog shutdown
/// (`RALPH_WATCHDOG_TIMEOUT_MS`, default 15 s).
pub fn watchdog_timeout() -> Duration {
    std::env::var("RALPH_WATCHDOG_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(15))
}

/// Agent command line (`RALPH_AGENT_COMMAND`, whitespace-split; `${prompt}`
/// expands to the generated prompt). Defaults to `claude -p ${prompt}`.
pub fn agent_command() -> (String, Vec<String>) {
    let raw = std::env::var("RALPH_AGENT_COMMAND")
        .unwrap_or_else(|_| "claude -p ${prompt}".to_string());
    let mut parts = raw.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_else(|| "claude".to_string());
    (program, parts.collect())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
