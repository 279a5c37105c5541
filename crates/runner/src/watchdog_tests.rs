// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn steady_heartbeats_keep_the_watchdog_quiet() {
    let (mut tx, rx) = tokio::io::duplex(64);
    let watchdog = tokio::spawn(watch_heartbeats(rx, Duration::from_millis(200)));

    for _ in 0..5 {
        tx.write_all(b"beat\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    drop(tx);

    // Only the disconnect ends it
    let event = watchdog.await.unwrap();
    assert_eq!(event, WatchdogEvent::Disconnected);
}

#[tokio::test]
async fn missed_heartbeat_fires_after_timeout() {
    let (mut tx, rx) = tokio::io::duplex(64);
    let watchdog = tokio::spawn(watch_heartbeats(rx, Duration::from_millis(100)));

    tx.write_all(b"beat\n").await.unwrap();
    // Keep the pipe open but silent past the threshold
    tokio::time::sleep(Duration::from_millis(300)).await;

    let event = watchdog.await.unwrap();
    assert_eq!(event, WatchdogEvent::HeartbeatMissed);
    drop(tx);
}

#[tokio::test]
async fn immediate_disconnect_is_reported() {
    let (tx, rx) = tokio::io::duplex(64);
    drop(tx);

    let event = watch_heartbeats(rx, Duration::from_secs(1)).await;
    assert_eq!(event, WatchdogEvent::Disconnected);
}
