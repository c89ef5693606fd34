//! Update lifecycle: check, download, verify, hand off.
//!
//! This module handles:
//! - Fetching and decoding the update feed
//! - Comparing the advertised version with the running one
//! - Downloading and unpacking the update package
//! - Verifying the bundle against the running application's ML-DSA signer
//! - Dispatching a job to the out-of-process installer
//!
//! ```text
//!  check_for_updates()
//!        │  Idle → CheckingForUpdate (or AlreadyChecking)
//!        ▼
//!  fetch feed ──► 204 / empty ──► UpToDate
//!        │
//!   is_newer? ──── no ──────────► UpToDate
//!        │ yes
//!        ▼
//!  download + extract ─► verify signature ─► dispatch job ─► publish
//!        │
//!        └─ any failure ─► Err, state back to Idle
//! ```

mod download;
mod feed;
mod installer;
mod schedule;
mod signature;
mod transport;
mod updater;
mod version;

pub use download::{download_update, DownloadedUpdate};
pub use feed::{decode_update, fetch_update, FeedResponse};
pub use installer::{InstallJob, InstallerDispatcher, ProcessInstaller, HANDSHAKE_ACCEPTED};
pub use schedule::AutomaticChecks;
pub use signature::{
    resource_manifest, verify, CodeSigningRequirement, VerifiedUpdate, SIGNATURE_DIR,
    SIGNATURE_FILE, SIGNER_KEY_FILE, SIGNING_CONTEXT,
};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use updater::{Updater, UpdaterBuilder};
pub use version::{is_newer, ReleaseVersion};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use url::Url;

/// How to ask the server for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    url: Url,
    headers: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl UpdateRequest {
    /// A plain `GET` of `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Add a header, e.g. `Authorization` for a private update server.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Bound the whole request by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Feed URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Extra request headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Request timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// What the core needs to know about a release described by the feed.
///
/// The updater is generic over this trait so hosts can decode the feed into
/// their own type and keep any extra data they publish; the core only ever
/// reads the version and the download locations.
pub trait ReleaseInfo: DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Advertised version of the release.
    fn version(&self) -> &ReleaseVersion;

    /// Where the update package can be downloaded from, in preference order.
    fn download_urls(&self) -> Vec<Url>;
}

/// The default feed entry.
///
/// ```json
/// { "version": "2.0", "url": "https://example.com/App-2.0.tar.gz",
///   "name": "App 2.0", "notes": "…", "pub_date": "2024-01-01T00:00:00Z" }
/// ```
///
/// Unrecognised keys are kept in [`Update::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Advertised version.
    pub version: ReleaseVersion,
    /// Primary download location of the package.
    pub url: Url,
    /// Alternative download locations, tried after `url`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<Url>,
    /// Human-readable release name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Release notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Publication date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    /// Feed fields this type does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReleaseInfo for Update {
    fn version(&self) -> &ReleaseVersion {
        &self.version
    }

    fn download_urls(&self) -> Vec<Url> {
        std::iter::once(self.url.clone())
            .chain(self.mirrors.iter().cloned())
            .collect()
    }
}

/// Current state of an [`Updater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdaterState {
    /// Doing nothing.
    #[default]
    Idle,
    /// A check is in flight.
    CheckingForUpdate,
}

/// Result of one [`Updater::check_for_updates`] call.
#[derive(Debug, Clone)]
pub enum CheckOutcome<U> {
    /// The server has nothing newer than the running version.
    UpToDate,
    /// A newer release was verified and handed to the installer.
    Installed(U),
    /// Another check was already in flight; this call did nothing.
    AlreadyChecking,
}

impl<U> CheckOutcome<U> {
    /// The dispatched update, if any.
    #[must_use]
    pub fn update(&self) -> Option<&U> {
        match self {
            Self::Installed(update) => Some(update),
            Self::UpToDate | Self::AlreadyChecking => None,
        }
    }
}
