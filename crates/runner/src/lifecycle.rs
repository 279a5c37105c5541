// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner lifecycle: singleton guard, startup, shutdown.
//!
//! Only one scheduler may run per host. The guard is a Unix domain socket
//! plus a PID file: startup probes the endpoint first (an answering
//! listener means another instance owns it), then takes an exclusive lock
//! on the PID file to close the probe/bind race, reclaims any stale
//! socket file, and binds.

use crate::env;
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

/// Runner file layout under the data directory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (e.g. ~/.local/state/ralph)
    pub data_dir: PathBuf,
    /// Singleton endpoint
    pub socket_path: PathBuf,
    /// Scheduler process id
    pub pid_path: PathBuf,
    /// Runner log file
    pub log_path: PathBuf,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let data_dir = env::data_dir().ok_or(LifecycleError::NoDataDir)?;
        Ok(Self {
            socket_path: data_dir.join("ralph-runner.sock"),
            pid_path: data_dir.join("runner.pid"),
            log_path: data_dir.join("runner.log"),
            data_dir,
        })
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine data directory")]
    NoDataDir,

    /// Another scheduler owns the endpoint; callers exit zero
    #[error("another runner instance is already running")]
    AlreadyRunning,

    #[error("failed to bind singleton socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Held singleton resources; release via [`RunnerGuard::shutdown`].
#[derive(Debug)]
pub struct RunnerGuard {
    config: Config,
    // NOTE(lifetime): Held to maintain the exclusive PID-file lock
    #[allow(dead_code)]
    pid_file: File,
    listener: Option<UnixListener>,
}

impl RunnerGuard {
    /// Take the endpoint listener to spawn the accept loop.
    pub fn take_listener(&mut self) -> Option<UnixListener> {
        self.listener.take()
    }

    /// Best-effort teardown: close the endpoint, unlink the socket,
    /// remove the PID file. The lock releases when the guard drops.
    pub fn shutdown(self) {
        info!("releasing singleton guard");
        drop(self.listener);
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(error = %e, "failed to remove socket file");
            }
        }
        if self.config.pid_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.pid_path) {
                warn!(error = %e, "failed to remove PID file");
            }
        }
    }
}

/// Acquire the singleton guard.
pub async fn startup(config: &Config) -> Result<RunnerGuard, LifecycleError> {
    match startup_inner(config).await {
        Ok(guard) => Ok(guard),
        Err(e) => {
            // Files owned by a live instance must not be cleaned up
            if !matches!(e, LifecycleError::AlreadyRunning) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<RunnerGuard, LifecycleError> {
    std::fs::create_dir_all(&config.data_dir)?;

    // 1. Probe the endpoint: a successful connect means another instance
    // is alive and listening.
    if UnixStream::connect(&config.socket_path).await.is_ok() {
        return Err(LifecycleError::AlreadyRunning);
    }

    // 2. Exclusive PID-file lock closes the race between two starters
    // that both saw a dead endpoint. Open without truncating so a losing
    // contender does not wipe the winner's PID.
    let pid_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.pid_path)?;
    pid_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::AlreadyRunning)?;

    let mut pid_file = pid_file;
    pid_file.set_len(0)?;
    writeln!(pid_file, "{}", std::process::id())?;
    let pid_file = pid_file;

    // 3. Reclaim a stale socket file and bind the endpoint
    if config.socket_path.exists() {
        warn!(path = %config.socket_path.display(), "reclaiming stale socket file");
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    info!(pid = std::process::id(), socket = %config.socket_path.display(), "singleton acquired");

    Ok(RunnerGuard {
        config: config.clone(),
        pid_file,
        listener: Some(listener),
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.pid_path.exists() {
        let _ = std::fs::remove_file(&config.pid_path);
    }
}

/// Accept and immediately drop endpoint connections. Connecting is the
/// whole protocol: a successful connect tells the peer we are alive.
pub fn spawn_acceptor(listener: UnixListener) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((_stream, _addr)) => {}
                Err(e) => {
                    warn!(error = %e, "singleton endpoint accept failed");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
