// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parent-process watchdog.
//!
//! When the scheduler is spawned as a supervised child it can opt into a
//! heartbeat channel on stdin: one line per beat. A gap beyond the
//! configured threshold or a closed pipe means the parent died, and the
//! scheduler should shut down rather than run orphaned.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

/// Why the watchdog fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// No heartbeat within the threshold
    HeartbeatMissed,
    /// The heartbeat channel closed (parent exited)
    Disconnected,
}

/// Consume heartbeat lines until they stop; returns why.
pub async fn watch_heartbeats<R: AsyncRead + Unpin>(
    reader: R,
    timeout: Duration,
) -> WatchdogEvent {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match tokio::time::timeout(timeout, lines.next_line()).await {
            Ok(Ok(Some(_line))) => continue,
            Ok(Ok(None)) => {
                warn!("watchdog: heartbeat channel closed");
                return WatchdogEvent::Disconnected;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "watchdog: heartbeat read failed");
                return WatchdogEvent::Disconnected;
            }
            Err(_elapsed) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "watchdog: heartbeat missed"
                );
                return WatchdogEvent::HeartbeatMissed;
            }
        }
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
