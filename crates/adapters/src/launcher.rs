// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent launcher.
//!
//! Spawns the coding-agent process detached so it outlives the scheduler.
//! The launcher resolves within a bounded startup window by either
//! observing a live PID, receiving an early non-zero exit, or letting the
//! window elapse (deemed success if the PID is still live).

use crate::process::pid_alive;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

/// Default startup window before a launch is deemed successful.
pub const STARTUP_WINDOW: Duration = Duration::from_secs(30);

/// What the scheduler hands to the launcher.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub execution_id: String,
    pub prompt: String,
    pub cwd: PathBuf,
    /// Where the agent transcript should be appended
    pub log_path: Option<PathBuf>,
}

/// What the launcher reports back.
#[derive(Debug, Clone, Default)]
pub struct LaunchOutcome {
    pub success: bool,
    pub agent_task_id: Option<String>,
    pub agent_pid: Option<u32>,
    pub log_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl LaunchOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Pluggable launcher contract.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> LaunchOutcome;
}

/// Launcher that spawns a configured agent command as a detached child.
///
/// `${prompt}` in the argument list is replaced with the generated prompt.
/// The child is placed in its own process group so scheduler death does
/// not take the agent down with it.
#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    program: String,
    args: Vec<String>,
    startup_window: Duration,
}

impl DetachedLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            startup_window: STARTUP_WINDOW,
        }
    }

    pub fn with_startup_window(mut self, window: Duration) -> Self {
        self.startup_window = window;
        self
    }
}

#[async_trait]
impl Launcher for DetachedLauncher {
    async fn launch(&self, spec: LaunchSpec) -> LaunchOutcome {
        let task_id = uuid::Uuid::new_v4().to_string();
        let log_path = spec
            .log_path
            .clone()
            .unwrap_or_else(|| spec.cwd.join(".ralph").join("agent.log"));

        if let Some(parent) = log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return LaunchOutcome::failed(format!("failed to create log dir: {e}"));
            }
        }
        let log_file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Ok(f) => f,
            Err(e) => return LaunchOutcome::failed(format!("failed to open log file: {e}")),
        };
        let stderr_file = match log_file.try_clone() {
            Ok(f) => f,
            Err(e) => return LaunchOutcome::failed(format!("failed to clone log handle: {e}")),
        };

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("${prompt}", &spec.prompt))
            .collect();

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&spec.cwd)
            .env("RALPH_EXECUTION_ID", &spec.execution_id)
            .env("RALPH_AGENT_TASK_ID", &task_id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            // Detach: own process group, survives scheduler death
            .process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return LaunchOutcome::failed(format!("spawn failed: {e}")),
        };

        let Some(pid) = child.id() else {
            return LaunchOutcome::failed("spawned child has no pid");
        };

        info!(
            execution_id = %spec.execution_id,
            pid,
            program = %self.program,
            "agent spawned"
        );

        // Startup window: an early exit decides the outcome, otherwise a
        // live PID at the deadline is success.
        let outcome = match tokio::time::timeout(self.startup_window, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                // Finished the whole task inside the window
                LaunchOutcome {
                    success: true,
                    agent_task_id: Some(task_id),
                    agent_pid: Some(pid),
                    log_path: Some(log_path),
                    error: None,
                }
            }
            Ok(Ok(status)) => {
                warn!(execution_id = %spec.execution_id, %status, "agent exited during startup");
                LaunchOutcome::failed(format!("agent exited during startup: {status}"))
            }
            Ok(Err(e)) => LaunchOutcome::failed(format!("wait failed: {e}")),
            Err(_elapsed) => {
                // Window elapsed; keep a reaper task so the child does not
                // linger as a zombie when it eventually exits.
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                if pid_alive(pid) {
                    LaunchOutcome {
                        success: true,
                        agent_task_id: Some(task_id),
                        agent_pid: Some(pid),
                        log_path: Some(log_path),
                        error: None,
                    }
                } else {
                    LaunchOutcome::failed("agent died before startup window elapsed")
                }
            }
        };

        outcome
    }
}

/// Scriptable launcher for engine tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default, Clone)]
pub struct FakeLauncher {
    inner: std::sync::Arc<parking_lot::Mutex<FakeLauncherState>>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
struct FakeLauncherState {
    scripted: std::collections::VecDeque<LaunchOutcome>,
    launches: Vec<LaunchSpec>,
    next_pid: u32,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an explicit outcome for the next launch.
    pub fn script(&self, outcome: LaunchOutcome) {
        self.inner.lock().scripted.push_back(outcome);
    }

    /// Queue a failure for the next launch.
    pub fn script_failure(&self, error: &str) {
        self.script(LaunchOutcome::failed(error));
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.inner.lock().launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.inner.lock().launches.len()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, spec: LaunchSpec) -> LaunchOutcome {
        let mut state = self.inner.lock();
        state.launches.push(spec.clone());
        if let Some(outcome) = state.scripted.pop_front() {
            return outcome;
        }
        state.next_pid += 1;
        let pid = 40_000 + state.next_pid;
        LaunchOutcome {
            success: true,
            agent_task_id: Some(format!("task-{}", state.next_pid)),
            agent_pid: Some(pid),
            log_path: spec.log_path,
            error: None,
        }
    }
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;
