//! Configuration for bundle-updater.

use crate::error::{Error, Result};
use crate::update::{ProcessInstaller, ReleaseVersion, UpdateRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Updater configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// URL of the update feed.
    pub feed_url: Url,

    /// Feed request timeout in seconds (0 disables the timeout).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Interval between automatic checks in seconds (0 disables them).
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Version of the running application.
    #[serde(default = "default_current_version")]
    pub current_version: String,

    /// Bundle of the running application.
    pub running_bundle: PathBuf,

    /// Where update packages are downloaded and unpacked.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Extra headers sent with the feed request (e.g. `Authorization`).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Out-of-process installer configuration.
    pub installer: InstallerConfig,
}

/// Installer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Path to the installer executable.
    pub path: PathBuf,

    /// Relaunch the application after installing.
    #[serde(default = "default_relaunch")]
    pub relaunch: bool,

    /// Arguments for the relaunched application.
    #[serde(default)]
    pub relaunch_args: Vec<String>,

    /// How long to wait for the installer to accept a job, in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_download_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "bundle-updater")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("bundle-updater"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_current_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

const fn default_request_timeout() -> u64 {
    60
}

const fn default_check_interval() -> u64 {
    4 * 3600 // 4 hours
}

const fn default_relaunch() -> bool {
    true
}

const fn default_handshake_timeout() -> u64 {
    30
}

impl UpdaterConfig {
    /// Create a configuration with defaults for everything but the
    /// required fields.
    #[must_use]
    pub fn new(feed_url: Url, running_bundle: PathBuf, installer_path: PathBuf) -> Self {
        Self {
            feed_url,
            headers: BTreeMap::new(),
            request_timeout_secs: default_request_timeout(),
            check_interval_secs: default_check_interval(),
            current_version: default_current_version(),
            running_bundle,
            download_dir: default_download_dir(),
            installer: InstallerConfig {
                path: installer_path,
                relaunch: default_relaunch(),
                relaunch_args: Vec::new(),
                handshake_timeout_secs: default_handshake_timeout(),
            },
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The feed request described by this configuration.
    #[must_use]
    pub fn update_request(&self) -> UpdateRequest {
        let mut request = UpdateRequest::new(self.feed_url.clone());
        for (name, value) in &self.headers {
            request = request.with_header(name, value);
        }
        if self.request_timeout_secs > 0 {
            request = request.with_timeout(Duration::from_secs(self.request_timeout_secs));
        }
        request
    }

    /// The running application's version.
    ///
    /// # Errors
    ///
    /// Returns an error if `current_version` is not a version.
    pub fn current_version(&self) -> Result<ReleaseVersion> {
        ReleaseVersion::parse(&self.current_version)
            .map_err(|e| Error::Config(format!("current_version: {e}")))
    }

    /// Interval between automatic checks, if enabled.
    #[must_use]
    pub fn check_interval(&self) -> Option<Duration> {
        (self.check_interval_secs > 0).then(|| Duration::from_secs(self.check_interval_secs))
    }

    /// Installer dispatcher described by this configuration.
    #[must_use]
    pub fn process_installer(&self) -> ProcessInstaller {
        ProcessInstaller::new(
            &self.installer.path,
            &self.download_dir,
            Duration::from_secs(self.installer.handshake_timeout_secs),
        )
    }
}
