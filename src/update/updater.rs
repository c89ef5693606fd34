//! The update lifecycle state machine.

use crate::error::{Error, Result};
use crate::event::{create_event_channel, UpdaterEvent, UpdaterEventsChannel, UpdaterEventsSender};
use crate::update::download::download_update;
use crate::update::feed::{fetch_update, FeedResponse};
use crate::update::installer::{InstallJob, InstallerDispatcher};
use crate::update::signature::{verify, CodeSigningRequirement};
use crate::update::transport::{HttpTransport, ReqwestTransport};
use crate::update::version::{is_newer, ReleaseVersion};
use crate::update::{CheckOutcome, ReleaseInfo, Update, UpdateRequest, UpdaterState};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Capacity of the discovered-updates channel.
const UPDATES_CHANNEL_CAPACITY: usize = 16;

/// Builder for constructing an [`Updater`].
pub struct UpdaterBuilder<U = Update> {
    request: UpdateRequest,
    current_version: Option<ReleaseVersion>,
    running_bundle: Option<PathBuf>,
    requirement: Option<CodeSigningRequirement>,
    transport: Option<Arc<dyn HttpTransport>>,
    installer: Option<Arc<dyn InstallerDispatcher>>,
    download_dir: Option<PathBuf>,
    relaunch: bool,
    relaunch_args: Vec<String>,
    _release: PhantomData<fn() -> U>,
}

impl<U: ReleaseInfo> UpdaterBuilder<U> {
    /// Start building an updater that sends `request` to check for updates.
    #[must_use]
    pub fn new(request: UpdateRequest) -> Self {
        Self {
            request,
            current_version: None,
            running_bundle: None,
            requirement: None,
            transport: None,
            installer: None,
            download_dir: None,
            relaunch: true,
            relaunch_args: Vec::new(),
            _release: PhantomData,
        }
    }

    /// Version of the running application.
    #[must_use]
    pub fn current_version(mut self, version: ReleaseVersion) -> Self {
        self.current_version = Some(version);
        self
    }

    /// Bundle of the running application. Updates replace it, and its
    /// signature defines which signer updates must come from.
    #[must_use]
    pub fn running_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.running_bundle = Some(path.into());
        self
    }

    /// Use an explicit code signing requirement instead of reading it from
    /// the running bundle.
    #[must_use]
    pub fn requirement(mut self, requirement: CodeSigningRequirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    /// HTTP transport (defaults to [`ReqwestTransport`]).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Installer the verified update is handed to.
    #[must_use]
    pub fn installer(mut self, installer: Arc<dyn InstallerDispatcher>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Where packages are downloaded and unpacked.
    #[must_use]
    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Whether the installer relaunches the application, and with which
    /// arguments.
    #[must_use]
    pub fn relaunch(mut self, relaunch: bool, args: Vec<String>) -> Self {
        self.relaunch = relaunch;
        self.relaunch_args = args;
        self
    }

    /// Build the updater.
    ///
    /// A running bundle that yields no code signing requirement does not fail
    /// the build; every check then fails at verification with
    /// [`Error::RetrievingCodeSigningRequirement`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the current version, running bundle or
    /// installer is missing.
    pub fn build(self) -> Result<Updater<U>> {
        let current_version = self
            .current_version
            .ok_or_else(|| Error::Config("current version is required".to_string()))?;
        let running_bundle = self
            .running_bundle
            .ok_or_else(|| Error::Config("running bundle is required".to_string()))?;
        let installer = self
            .installer
            .ok_or_else(|| Error::Config("installer is required".to_string()))?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let download_dir = self
            .download_dir
            .unwrap_or_else(|| std::env::temp_dir().join("bundle-updater"));

        let requirement = match self.requirement {
            Some(requirement) => Ok(Arc::new(requirement)),
            None => CodeSigningRequirement::for_running_bundle(&running_bundle)
                .map(Arc::new)
                .map_err(|e| {
                    warn!("No code signing requirement, updates cannot be verified: {e}");
                    e.to_string()
                }),
        };

        let (state_tx, _) = watch::channel(UpdaterState::Idle);
        let (updates_tx, _) = broadcast::channel(UPDATES_CHANNEL_CAPACITY);
        let (events_tx, _) = create_event_channel();

        info!(
            "Updater ready: version {current_version}, feed {}",
            self.request.url()
        );

        Ok(Updater {
            inner: Arc::new(Inner {
                request: RwLock::new(Arc::new(self.request)),
                state_tx,
                updates_tx,
                events_tx,
                current_version,
                running_bundle,
                requirement,
                transport,
                installer,
                download_dir,
                relaunch: self.relaunch,
                relaunch_args: self.relaunch_args,
            }),
        })
    }
}

struct Inner<U> {
    request: RwLock<Arc<UpdateRequest>>,
    state_tx: watch::Sender<UpdaterState>,
    updates_tx: broadcast::Sender<U>,
    events_tx: UpdaterEventsSender,
    current_version: ReleaseVersion,
    running_bundle: PathBuf,
    requirement: std::result::Result<Arc<CodeSigningRequirement>, String>,
    transport: Arc<dyn HttpTransport>,
    installer: Arc<dyn InstallerDispatcher>,
    download_dir: PathBuf,
    relaunch: bool,
    relaunch_args: Vec<String>,
}

/// Checks for, downloads, verifies and hands off updates.
///
/// Cheap to clone; clones share state.
pub struct Updater<U = Update> {
    inner: Arc<Inner<U>>,
}

impl<U> Clone for Updater<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Returns the state to `Idle` when a check ends, however it ends.
struct CheckGuard<'a> {
    state_tx: &'a watch::Sender<UpdaterState>,
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.state_tx.send_replace(UpdaterState::Idle);
        debug!("Updater state: Idle");
    }
}

impl<U: ReleaseInfo> Updater<U> {
    /// Start building an updater.
    #[must_use]
    pub fn builder(request: UpdateRequest) -> UpdaterBuilder<U> {
        UpdaterBuilder::new(request)
    }

    /// Run one check: fetch, compare, download, verify, dispatch.
    ///
    /// If a check is already in flight this returns
    /// [`CheckOutcome::AlreadyChecking`] immediately and does nothing else.
    /// On success with a newer release, the update is published on
    /// [`Updater::updates`] before the state returns to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. The state is `Idle` again by the time
    /// the error is returned, and nothing is retried.
    pub async fn check_for_updates(&self) -> Result<CheckOutcome<U>> {
        let acquired = self.inner.state_tx.send_if_modified(|state| {
            if *state == UpdaterState::Idle {
                *state = UpdaterState::CheckingForUpdate;
                true
            } else {
                false
            }
        });
        if !acquired {
            debug!("Check already in progress, ignoring request");
            return Ok(CheckOutcome::AlreadyChecking);
        }
        let _guard = CheckGuard {
            state_tx: &self.inner.state_tx,
        };
        debug!("Updater state: CheckingForUpdate");

        let request = self.update_request();
        info!("Checking for updates at {}", request.url());
        let _ = self.inner.events_tx.send(UpdaterEvent::CheckStarted);

        let result = self.run_check(&request).await;
        match &result {
            Ok(CheckOutcome::UpToDate) => {
                info!("No update available");
                let _ = self.inner.events_tx.send(UpdaterEvent::UpToDate);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Update check failed: {e}");
                let _ = self.inner.events_tx.send(UpdaterEvent::CheckFailed {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_check(&self, request: &UpdateRequest) -> Result<CheckOutcome<U>> {
        let inner = &self.inner;

        let update = match fetch_update::<U>(inner.transport.as_ref(), request).await? {
            FeedResponse::NoUpdate => return Ok(CheckOutcome::UpToDate),
            FeedResponse::Available(update) => update,
        };

        if !is_newer(update.version(), &inner.current_version) {
            debug!(
                "Server offers {} which is not newer than {}",
                update.version(),
                inner.current_version
            );
            return Ok(CheckOutcome::UpToDate);
        }

        info!(
            "Update available: {} -> {}",
            inner.current_version,
            update.version()
        );
        let _ = inner.events_tx.send(UpdaterEvent::UpdateAvailable {
            version: update.version().to_string(),
        });

        let downloaded =
            download_update(inner.transport.as_ref(), update, &inner.download_dir).await?;

        let requirement = inner
            .requirement
            .as_ref()
            .map(Arc::clone)
            .map_err(|e| Error::RetrievingCodeSigningRequirement(e.clone()))?;
        let bundle = downloaded.bundle_path().to_path_buf();
        let verified = tokio::task::spawn_blocking(move || verify(downloaded, &requirement))
            .await
            .map_err(|e| verification_task_failed(&bundle, &e))??;

        let job = InstallJob::new(
            &verified,
            &inner.running_bundle,
            inner.relaunch,
            inner.relaunch_args.clone(),
        );
        inner.installer.dispatch(&job).await?;

        // The installer owns the bundle from here on.
        let (update, _, workdir) = verified.into_parts();
        let kept = workdir.keep();
        debug!("Handed {} to the installer", kept.display());

        info!("Update {} dispatched to installer", update.version());
        let _ = inner.events_tx.send(UpdaterEvent::UpdateDispatched {
            version: update.version().to_string(),
        });
        let _ = inner.updates_tx.send(update.clone());

        Ok(CheckOutcome::Installed(update))
    }
}

/// The verification task itself died; the package was never judged.
fn verification_task_failed(bundle: &Path, err: &tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!(
        "verification task for {} failed: {err}",
        bundle.display()
    )))
}

impl<U> Updater<U> {
    /// The request that will be sent by the next check.
    #[must_use]
    pub fn update_request(&self) -> Arc<UpdateRequest> {
        self.inner.request.read().clone()
    }

    /// Replace the request used by subsequent checks. A check already in
    /// flight keeps the request it started with.
    pub fn set_update_request(&self, request: UpdateRequest) {
        info!("Update request set to {}", request.url());
        *self.inner.request.write() = Arc::new(request);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> UpdaterState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<UpdaterState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to updates as they are dispatched to the installer.
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<U> {
        self.inner.updates_tx.subscribe()
    }

    /// Subscribe to updater events, including check failures.
    #[must_use]
    pub fn events(&self) -> UpdaterEventsChannel {
        self.inner.events_tx.subscribe()
    }

    /// Version of the running application.
    #[must_use]
    pub fn current_version(&self) -> &ReleaseVersion {
        &self.inner.current_version
    }

    /// The running application's code signing requirement, if it could be
    /// retrieved.
    #[must_use]
    pub fn requirement(&self) -> Option<&CodeSigningRequirement> {
        self.inner.requirement.as_deref().ok()
    }

    /// Bundle that updates replace.
    #[must_use]
    pub fn running_bundle(&self) -> &Path {
        &self.inner.running_bundle
    }
}
