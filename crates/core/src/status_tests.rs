// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    pending_to_ready = { ExecutionStatus::Pending, ExecutionStatus::Ready },
    ready_to_starting = { ExecutionStatus::Ready, ExecutionStatus::Starting },
    starting_to_running = { ExecutionStatus::Starting, ExecutionStatus::Running },
    starting_back_to_ready = { ExecutionStatus::Starting, ExecutionStatus::Ready },
    starting_to_failed = { ExecutionStatus::Starting, ExecutionStatus::Failed },
    running_to_completed = { ExecutionStatus::Running, ExecutionStatus::Completed },
    running_to_interrupted = { ExecutionStatus::Running, ExecutionStatus::Interrupted },
    running_to_failed = { ExecutionStatus::Running, ExecutionStatus::Failed },
    interrupted_to_ready = { ExecutionStatus::Interrupted, ExecutionStatus::Ready },
    failed_manual_retry = { ExecutionStatus::Failed, ExecutionStatus::Ready },
    completed_to_merging = { ExecutionStatus::Completed, ExecutionStatus::Merging },
    merging_to_merged = { ExecutionStatus::Merging, ExecutionStatus::Merged },
    merging_to_failed = { ExecutionStatus::Merging, ExecutionStatus::Failed },
)]
fn legal_transitions(from: ExecutionStatus, to: ExecutionStatus) {
    assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
}

#[parameterized(
    pending_to_running = { ExecutionStatus::Pending, ExecutionStatus::Running },
    ready_to_running = { ExecutionStatus::Ready, ExecutionStatus::Running },
    running_to_ready = { ExecutionStatus::Running, ExecutionStatus::Ready },
    running_to_merged = { ExecutionStatus::Running, ExecutionStatus::Merged },
    completed_to_merged = { ExecutionStatus::Completed, ExecutionStatus::Merged },
    merged_to_ready = { ExecutionStatus::Merged, ExecutionStatus::Ready },
    stopped_to_ready = { ExecutionStatus::Stopped, ExecutionStatus::Ready },
    interrupted_to_running = { ExecutionStatus::Interrupted, ExecutionStatus::Running },
)]
fn illegal_transitions(from: ExecutionStatus, to: ExecutionStatus) {
    assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
}

#[test]
fn operator_stop_reachable_from_every_state() {
    let all = [
        ExecutionStatus::Pending,
        ExecutionStatus::Ready,
        ExecutionStatus::Starting,
        ExecutionStatus::Running,
        ExecutionStatus::Interrupted,
        ExecutionStatus::Completed,
        ExecutionStatus::Merging,
        ExecutionStatus::Merged,
        ExecutionStatus::Failed,
        ExecutionStatus::Stopped,
    ];
    for status in all {
        assert!(status.can_transition_to(ExecutionStatus::Stopped));
    }
}

#[test]
fn terminal_statuses() {
    assert!(ExecutionStatus::Merged.is_terminal());
    assert!(ExecutionStatus::Stopped.is_terminal());
    assert!(ExecutionStatus::Failed.is_terminal());
    assert!(!ExecutionStatus::Completed.is_terminal());
    assert!(!ExecutionStatus::Merging.is_terminal());
}

#[test]
fn active_statuses_count_against_budget() {
    assert!(ExecutionStatus::Starting.is_active());
    assert!(ExecutionStatus::Running.is_active());
    assert!(!ExecutionStatus::Ready.is_active());
    assert!(!ExecutionStatus::Interrupted.is_active());
}

#[test]
fn dependency_satisfaction() {
    assert!(ExecutionStatus::Completed.satisfies_dependency());
    assert!(ExecutionStatus::Merging.satisfies_dependency());
    assert!(ExecutionStatus::Merged.satisfies_dependency());
    assert!(!ExecutionStatus::Running.satisfies_dependency());
    assert!(!ExecutionStatus::Failed.satisfies_dependency());
}

#[test]
fn serde_round_trip_uses_snake_case() {
    let json = serde_json::to_string(&ExecutionStatus::Starting).unwrap();
    assert_eq!(json, "\"starting\"");
    let back: ExecutionStatus = serde_json::from_str("\"interrupted\"").unwrap();
    assert_eq!(back, ExecutionStatus::Interrupted);
}
