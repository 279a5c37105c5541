// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process liveness probes

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Whether a process with the given PID exists.
///
/// Sends signal 0: delivery is not attempted, only permission and existence
/// checks run. `EPERM` means the process exists but belongs to another
/// user, which still counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    let pid = Pid::from_raw(pid as i32);
    match kill(pid, None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
