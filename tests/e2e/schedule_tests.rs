//! Automatic checks against the full updater.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::TestApp;
use bundle_updater::{CheckOutcome, UpdaterEvent, UpdaterState};
use std::time::Duration;

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Test 1: failing checks do not stop the schedule
#[tokio::test(start_paused = true)]
async fn test_schedule_survives_failures() {
    let app = TestApp::new();
    app.transport.set_feed(503, "maintenance");
    let mut events = app.updater.events();

    let schedule = app
        .updater
        .start_automatic_checks(Duration::from_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(181)).await;
    settle().await;

    assert_eq!(app.transport.sends(), 3);
    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, UpdaterEvent::CheckFailed { .. }) {
            failures += 1;
        }
    }
    assert_eq!(failures, 3);
    assert!(!schedule.is_finished());
}

/// Test 2: a manual check is suppressed while a scheduled one runs
#[tokio::test(start_paused = true)]
async fn test_manual_check_during_scheduled_check() {
    let app = TestApp::new();
    let gate = app.transport.hold_feed();

    let _schedule = app
        .updater
        .start_automatic_checks(Duration::from_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;
    assert_eq!(app.updater.state(), UpdaterState::CheckingForUpdate);

    let outcome = app.updater.check_for_updates().await.unwrap();
    assert!(matches!(outcome, CheckOutcome::AlreadyChecking));

    gate.notify_one();
    let mut state = app.updater.watch_state();
    state
        .wait_for(|state| *state == UpdaterState::Idle)
        .await
        .unwrap();
    assert_eq!(app.transport.sends(), 1);
}

/// Test 3: nothing is checked after cancellation
#[tokio::test(start_paused = true)]
async fn test_cancelled_schedule_stops_checking() {
    let app = TestApp::new();

    let schedule = app
        .updater
        .start_automatic_checks(Duration::from_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;
    assert_eq!(app.transport.sends(), 1);

    schedule.cancel();
    tokio::time::sleep(Duration::from_secs(600)).await;
    settle().await;
    assert_eq!(app.transport.sends(), 1);
    assert!(schedule.is_cancelled());
}

/// Test 4: cancelling the schedule lets the running check finish
#[tokio::test(start_paused = true)]
async fn test_cancel_during_scheduled_check() {
    let app = TestApp::new();
    let gate = app.transport.hold_feed();
    let mut events = app.updater.events();

    let schedule = app
        .updater
        .start_automatic_checks(Duration::from_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;
    assert_eq!(app.updater.state(), UpdaterState::CheckingForUpdate);

    schedule.cancel();
    gate.notify_one();
    let mut state = app.updater.watch_state();
    state
        .wait_for(|state| *state == UpdaterState::Idle)
        .await
        .unwrap();

    assert_eq!(events.try_recv().unwrap(), UpdaterEvent::CheckStarted);
    assert_eq!(events.try_recv().unwrap(), UpdaterEvent::UpToDate);

    tokio::time::sleep(Duration::from_secs(600)).await;
    settle().await;
    assert_eq!(app.transport.sends(), 1);
    assert!(schedule.is_finished());
}
