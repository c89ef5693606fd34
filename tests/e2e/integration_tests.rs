//! Full check pipeline scenarios.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::{feed_body, package_without_bundle, Signer, TestApp, FEED_URL, PACKAGE_URL};
use bundle_updater::update::verify;
use bundle_updater::{
    CheckOutcome, CodeSigningRequirement, DownloadedUpdate, ErrorKind, ReleaseVersion,
    UpdateRequest, UpdaterEvent, UpdaterState,
};
use std::fs;
use tokio::sync::broadcast::error::TryRecvError;
use url::Url;

/// Test 1: a newer signed release is downloaded, verified and dispatched
#[tokio::test]
async fn test_newer_signed_release_is_dispatched() {
    let app = TestApp::new();
    let package = app.release(Some(&app.signer));
    app.transport.serve(PACKAGE_URL, package);
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));
    let mut updates = app.updater.updates();

    let outcome = app.updater.check_for_updates().await.unwrap();

    let update = outcome.update().expect("update should be installed");
    assert_eq!(update.version, ReleaseVersion::parse("2.0").unwrap());
    assert_eq!(update.notes.as_deref(), Some("Fixes"));

    let jobs = app.installer.jobs();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.target_bundle(), app.bundle.as_path());
    assert_eq!(job.terminate_pid(), std::process::id());
    assert_eq!(job.version(), "2.0");
    assert!(job.relaunch());

    // The unpacked bundle outlives the check so the installer can use it.
    assert!(job.update_bundle().is_dir());
    assert_eq!(
        fs::read(job.update_bundle().join("Contents/MacOS/App")).unwrap(),
        b"app v2.0"
    );

    let published = updates.try_recv().unwrap();
    assert_eq!(published.version.as_str(), "2.0");
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(app.updater.state(), UpdaterState::Idle);
}

/// Test 2: the event stream narrates a successful check in order
#[tokio::test]
async fn test_events_for_successful_check() {
    let app = TestApp::new();
    app.transport
        .serve(PACKAGE_URL, app.release(Some(&app.signer)));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));
    let mut events = app.updater.events();

    app.updater.check_for_updates().await.unwrap();

    assert_eq!(events.try_recv().unwrap(), UpdaterEvent::CheckStarted);
    assert_eq!(
        events.try_recv().unwrap(),
        UpdaterEvent::UpdateAvailable {
            version: "2.0".to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        UpdaterEvent::UpdateDispatched {
            version: "2.0".to_string()
        }
    );
    assert!(events.try_recv().is_err());
}

/// Test 3: a release signed by another key never reaches the installer
#[tokio::test]
async fn test_release_signed_by_other_key_is_rejected() {
    let app = TestApp::new();
    let impostor = Signer::generate();
    app.transport.serve(PACKAGE_URL, app.release(Some(&impostor)));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));
    let mut updates = app.updater.updates();

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    assert!(app.installer.jobs().is_empty());
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(app.updater.state(), UpdaterState::Idle);
}

/// Test 4: an unsigned release is rejected
#[tokio::test]
async fn test_unsigned_release_is_rejected() {
    let app = TestApp::new();
    app.transport.serve(PACKAGE_URL, app.release(None));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    assert!(err.to_string().contains("not signed"));
    assert!(app.installer.jobs().is_empty());
}

/// Test 5: a release modified after signing is rejected
#[tokio::test]
async fn test_tampered_release_is_rejected() {
    let app = TestApp::new();
    let staging = app.dir.path().join("tampered");
    let bundle = super::make_bundle(&staging, "App.app", b"app v2.0");
    app.signer.sign(&bundle);
    fs::write(bundle.join("Contents/MacOS/App"), b"app v2.0 with a payload").unwrap();
    app.transport.serve(PACKAGE_URL, super::package(&bundle));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    assert!(app.installer.jobs().is_empty());
}

/// Test 6: rejected downloads are cleaned up
#[tokio::test]
async fn test_rejected_download_is_removed() {
    let app = TestApp::new();
    app.transport
        .serve(PACKAGE_URL, app.release(Some(&Signer::generate())));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));

    app.updater.check_for_updates().await.unwrap_err();

    assert!(app.download_dir_entries().is_empty());
}

/// Test 7: an archive without a bundle fails with `MissingUpdateBundle`
#[tokio::test]
async fn test_archive_without_bundle() {
    let app = TestApp::new();
    app.transport.serve(PACKAGE_URL, package_without_bundle());
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingUpdateBundle);
    assert!(app.installer.jobs().is_empty());
}

/// Test 8: `204 No Content` means up to date and downloads nothing
#[tokio::test]
async fn test_no_content_is_up_to_date() {
    let app = TestApp::new();
    let mut updates = app.updater.updates();

    let outcome = app.updater.check_for_updates().await.unwrap();

    assert!(matches!(outcome, CheckOutcome::UpToDate));
    assert!(app.transport.downloads().is_empty());
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
}

/// Test 9: an older release on the feed is ignored
#[tokio::test]
async fn test_older_release_is_ignored() {
    let app = TestApp::new();
    app.transport
        .serve(PACKAGE_URL, app.release(Some(&app.signer)));
    app.transport.set_feed(200, feed_body("0.9", PACKAGE_URL));

    let outcome = app.updater.check_for_updates().await.unwrap();

    assert!(matches!(outcome, CheckOutcome::UpToDate));
    assert!(app.transport.downloads().is_empty());
    assert!(app.installer.jobs().is_empty());
}

/// Test 10: a truncated feed body surfaces the raw bytes
#[tokio::test]
async fn test_truncated_feed_body() {
    let app = TestApp::new();
    app.transport.set_feed(200, r#"{"version": "2.0", "url": "#);

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidJson);
    assert_eq!(
        err.server_data().unwrap().as_ref(),
        br#"{"version": "2.0", "url": "#
    );
    assert!(err.json_object().is_none());
}

/// Test 11: a server error surfaces status and body
#[tokio::test]
async fn test_server_error_response() {
    let app = TestApp::new();
    app.transport.set_feed(503, "maintenance");

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidServerResponse);
    assert_eq!(err.server_data().unwrap().as_ref(), b"maintenance");
    assert_eq!(app.updater.state(), UpdaterState::Idle);
}

/// Test 12: an installer refusal is reported and nothing is published
#[tokio::test]
async fn test_installer_refusal() {
    let app = TestApp::new();
    app.installer.reject_with("installer exited with status 1");
    app.transport
        .serve(PACKAGE_URL, app.release(Some(&app.signer)));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));
    let mut updates = app.updater.updates();

    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreparingUpdateJob);
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    assert!(app.download_dir_entries().is_empty());
    assert_eq!(app.updater.state(), UpdaterState::Idle);
}

/// Test 13: an unsigned running application cannot accept updates
#[tokio::test]
async fn test_unsigned_running_bundle() {
    let app = TestApp::with_running_bundle(false);
    app.transport
        .serve(PACKAGE_URL, app.release(Some(&app.signer)));
    app.transport.set_feed(200, feed_body("2.0", PACKAGE_URL));

    assert!(app.updater.requirement().is_none());
    let err = app.updater.check_for_updates().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RetrievingCodeSigningRequirement);
    assert!(app.installer.jobs().is_empty());
}

/// Test 14: mirrors are tried when the primary download fails
#[tokio::test]
async fn test_mirror_fallback() {
    let app = TestApp::new();
    let mirror = "https://mirror.example.net/App-2.0.tar.gz";
    app.transport.serve(mirror, app.release(Some(&app.signer)));
    let body = serde_json::json!({
        "version": "2.0",
        "url": PACKAGE_URL,
        "mirrors": [mirror],
    });
    app.transport.set_feed(200, body.to_string());

    let outcome = app.updater.check_for_updates().await.unwrap();

    assert!(outcome.update().is_some());
    assert_eq!(app.transport.downloads(), vec![Url::parse(mirror).unwrap()]);
    assert_eq!(app.installer.jobs().len(), 1);
}

/// Test 15: a replaced request is used by the next check
#[tokio::test]
async fn test_replaced_request_used_by_next_check() {
    let app = TestApp::new();
    let beta = Url::parse("https://updates.example.com/app/beta").unwrap();

    app.updater.check_for_updates().await.unwrap();
    app.updater
        .set_update_request(UpdateRequest::new(beta.clone()).with_header("X-Channel", "beta"));
    app.updater.check_for_updates().await.unwrap();

    assert_eq!(
        app.transport.requested(),
        vec![Url::parse(FEED_URL).unwrap(), beta]
    );
}

/// Test 16: the requirement derived from the running bundle accepts its own
/// releases and nothing else
#[tokio::test]
async fn test_running_bundle_requirement() {
    let app = TestApp::new();
    let requirement = CodeSigningRequirement::for_running_bundle(&app.bundle).unwrap();
    assert_eq!(
        app.updater.requirement().unwrap().fingerprint(),
        requirement.fingerprint()
    );

    let workdir = tempfile::tempdir().unwrap();
    let bundle = super::make_bundle(workdir.path(), "App.app", b"app v2.0");
    Signer::generate().sign(&bundle);
    let update = bundle_updater::Update {
        version: ReleaseVersion::parse("2.0").unwrap(),
        url: Url::parse(PACKAGE_URL).unwrap(),
        mirrors: Vec::new(),
        name: None,
        notes: None,
        pub_date: None,
        extra: serde_json::Map::new(),
    };

    let err = verify(DownloadedUpdate::new(update, bundle, workdir), &requirement).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
}

/// Test 17: replacing the request mid-check leaves the running check on the
/// old request
#[tokio::test]
async fn test_request_replaced_during_check() {
    let app = TestApp::new();
    let gate = app.transport.hold_feed();
    let beta = Url::parse("https://updates.example.com/app/beta").unwrap();

    let running = tokio::spawn({
        let updater = app.updater.clone();
        async move { updater.check_for_updates().await }
    });
    let mut state = app.updater.watch_state();
    state
        .wait_for(|state| *state == UpdaterState::CheckingForUpdate)
        .await
        .unwrap();

    app.updater.set_update_request(UpdateRequest::new(beta.clone()));
    gate.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(outcome, CheckOutcome::UpToDate));
    assert_eq!(app.transport.requested(), vec![Url::parse(FEED_URL).unwrap()]);

    gate.notify_one();
    app.updater.check_for_updates().await.unwrap();
    assert_eq!(
        app.transport.requested(),
        vec![Url::parse(FEED_URL).unwrap(), beta]
    );
}
