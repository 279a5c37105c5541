// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ralph Runner
//!
//! The autonomous execution supervisor: a long-lived scheduler that
//! promotes, claims, launches, and supervises PRD executions.
//!
//! Architecture:
//! - Singleton guard: Unix socket + PID file, one instance per host
//! - Runner loop: single poll driver, launches as independent tasks
//! - Observer task: drains runner events into the log

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;
mod lifecycle;
mod watchdog;

use clap::Parser;
use ralph_adapters::{CliGit, DetachedLauncher, GitAdapter, Launcher};
use ralph_core::{RunnerEvent, SystemClock};
use ralph_engine::{
    DefaultPromptGenerator, MemoryProbe, Runner, RunnerDeps, RunnerSettings, SysinfoMemory,
};
use ralph_storage::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::lifecycle::{Config, LifecycleError};

/// Autonomous execution supervisor for PRD-driven coding agents.
#[derive(Debug, Parser)]
#[command(name = "ralph-runner", version, about)]
struct Args {
    /// Poll tick interval in milliseconds
    #[arg(long, default_value_t = 5_000)]
    interval: u64,

    /// Concurrency cap; 0 or negative means auto from the stored config
    #[arg(long, default_value_t = 0)]
    concurrency: i64,

    /// Launch attempts before a record fails terminally
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Launch timeout in milliseconds
    #[arg(long, default_value_t = 60_000)]
    timeout: u64,
}

impl Args {
    fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            poll_interval: Duration::from_millis(self.interval),
            launch_timeout: Duration::from_millis(self.timeout),
            max_retries: self.max_retries,
            configured_concurrency: u32::try_from(self.concurrency).ok().filter(|c| *c > 0),
            ..RunnerSettings::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    rotate_log_if_needed(&config.log_path);

    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to set up logging: {e}");
            std::process::exit(1);
        }
    };

    info!("starting ralph-runner");

    let mut guard = match lifecycle::startup(&config).await {
        Ok(guard) => guard,
        Err(LifecycleError::AlreadyRunning) => {
            // Not an error: the host already has a scheduler
            let pid = std::fs::read_to_string(&config.pid_path).unwrap_or_default();
            let pid = pid.trim();
            if pid.is_empty() {
                eprintln!("ralph-runner is already running");
            } else {
                eprintln!("ralph-runner is already running (pid {pid})");
            }
            std::process::exit(0);
        }
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Some(listener) = guard.take_listener() {
        lifecycle::spawn_acceptor(listener);
    }

    // Wire up the runner
    let store = Arc::new(StateStore::open(config.data_dir.clone()));
    let (program, agent_args) = env::agent_command();
    let launcher = DetachedLauncher::new(program, agent_args);
    let (event_tx, event_rx) = mpsc::channel::<RunnerEvent>(256);
    spawn_event_logger(event_rx);

    let deps = RunnerDeps {
        store,
        git: Arc::new(CliGit::new()) as Arc<dyn GitAdapter>,
        launcher: Arc::new(launcher) as Arc<dyn Launcher>,
        prompts: Arc::new(DefaultPromptGenerator),
        memory: Arc::new(SysinfoMemory::new()) as Arc<dyn MemoryProbe>,
    };
    let mut runner = Runner::new(deps, args.runner_settings(), SystemClock, event_tx);
    let handle = runner.handle();

    // Graceful shutdown on SIGTERM/SIGINT
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            let stop = handle.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM, stopping"),
                    _ = sigint.recv() => info!("received SIGINT, stopping"),
                }
                stop.stop();
            });
        }
        _ => {
            error!("failed to install signal handlers");
            guard.shutdown();
            std::process::exit(1);
        }
    }

    // Optional parent-process watchdog on stdin
    if env::parent_watchdog_enabled() {
        let stop = handle.clone();
        let timeout = env::watchdog_timeout();
        tokio::spawn(async move {
            let event = watchdog::watch_heartbeats(tokio::io::stdin(), timeout).await;
            warn!(?event, "parent watchdog triggered, stopping");
            stop.stop();
        });
    }

    runner.run().await;

    guard.shutdown();
    info!("ralph-runner stopped");
}

/// Log runner events so operators can follow progress in the runner log.
fn spawn_event_logger(mut rx: mpsc::Receiver<RunnerEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RunnerEvent::PrdStarted { id, branch } => {
                    info!(%id, %branch, "prd started");
                }
                RunnerEvent::PrdCompleted { id, branch } => {
                    info!(%id, %branch, "prd completed");
                }
                RunnerEvent::PrdFailed { id, branch, error } => {
                    warn!(%id, %branch, error, "prd failed");
                }
                RunnerEvent::Log { message } => {
                    info!("{message}");
                }
            }
        }
    });
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (runner.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the runner log if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `runner.log` → `runner.log.1` → `runner.log.2` → `runner.log.3`,
/// deleting the oldest. Best-effort: rotation failures are ignored so the
/// runner still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config
            .log_path
            .parent()
            .ok_or_else(|| std::io::Error::other("log path has no parent"))?,
        config
            .log_path
            .file_name()
            .ok_or_else(|| std::io::Error::other("log path has no file name"))?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
