//! # bundle-updater
//!
//! Keeps a desktop application bundle up to date while it runs.
//!
//! An [`Updater`] asks an update server whether a newer release exists,
//! downloads and unpacks the package, checks that the new bundle was signed
//! by the same ML-DSA-65 key as the running one, and hands it to a separate
//! installer process that swaps the bundle once the application exits.
//!
//! ```rust,ignore
//! use bundle_updater::{ProcessInstaller, ReleaseVersion, UpdateRequest, Updater};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> bundle_updater::Result<()> {
//! let updater: Updater = Updater::builder(UpdateRequest::new(
//!     "https://updates.example.com/app/feed".parse().unwrap(),
//! ))
//! .current_version(ReleaseVersion::parse("1.4.0")?)
//! .running_bundle("/Applications/App.app")
//! .installer(Arc::new(ProcessInstaller::new(
//!     "/Applications/App.app/Contents/MacOS/installer",
//!     "/tmp/app-updates",
//!     Duration::from_secs(30),
//! )))
//! .build()?;
//!
//! let mut updates = updater.updates();
//! let _schedule = updater.start_automatic_checks(Duration::from_secs(3600))?;
//! while let Ok(update) = updates.recv().await {
//!     println!("{} is ready and will be installed on quit", update.version);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod event;
pub mod update;

pub use config::{InstallerConfig, UpdaterConfig};
pub use error::{Error, ErrorKind, Result};
pub use event::{UpdaterEvent, UpdaterEventsChannel};
pub use update::{
    is_newer, AutomaticChecks, CheckOutcome, CodeSigningRequirement, DownloadedUpdate,
    HttpResponse, HttpTransport, InstallJob, InstallerDispatcher, ProcessInstaller, ReleaseInfo,
    ReleaseVersion, ReqwestTransport, Update, UpdateRequest, Updater, UpdaterBuilder,
    UpdaterState, VerifiedUpdate,
};
