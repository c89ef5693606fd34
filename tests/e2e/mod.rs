//! End-to-end tests for bundle-updater.
//!
//! These drive a real `Updater` through the whole check pipeline: feed
//! request, package download and extraction, ML-DSA-65 bundle verification
//! and installer hand-off. The network and the installer process are
//! replaced by in-memory doubles from [`harness`].

mod integration_tests;
mod schedule_tests;

pub use harness::{
    feed_body, make_bundle, package, package_without_bundle, MockTransport, RecordingInstaller,
    Signer, TestApp, FEED_URL, PACKAGE_URL,
};
