//! Hand-off to the out-of-process installer.
//!
//! The installer is a separate executable. It receives an [`InstallJob`],
//! waits for the process named in it to exit, swaps the bundle on disk and
//! optionally relaunches it. None of that happens here: this side only
//! writes the job, starts the installer and waits for it to accept.

use crate::error::{Error, Result};
use crate::update::signature::VerifiedUpdate;
use crate::update::ReleaseInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Line the installer prints on stdout once it has taken ownership of a job.
pub const HANDSHAKE_ACCEPTED: &str = "accepted";

/// Job file name written into the job directory.
const JOB_FILE: &str = "install-job.json";

/// Everything the installer needs to replace the running bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallJob {
    update_bundle: PathBuf,
    target_bundle: PathBuf,
    terminate_pid: u32,
    relaunch: bool,
    relaunch_args: Vec<String>,
    version: String,
}

impl InstallJob {
    /// Describe the installation of a verified update over `target_bundle`,
    /// to happen once the current process exits.
    #[must_use]
    pub fn new<U: ReleaseInfo>(
        verified: &VerifiedUpdate<U>,
        target_bundle: impl Into<PathBuf>,
        relaunch: bool,
        relaunch_args: Vec<String>,
    ) -> Self {
        Self {
            update_bundle: verified.bundle_path().to_path_buf(),
            target_bundle: target_bundle.into(),
            terminate_pid: std::process::id(),
            relaunch,
            relaunch_args,
            version: verified.update().version().to_string(),
        }
    }

    /// The verified bundle to install.
    #[must_use]
    pub fn update_bundle(&self) -> &Path {
        &self.update_bundle
    }

    /// The bundle to replace.
    #[must_use]
    pub fn target_bundle(&self) -> &Path {
        &self.target_bundle
    }

    /// Process that must exit before the bundle is replaced.
    #[must_use]
    pub fn terminate_pid(&self) -> u32 {
        self.terminate_pid
    }

    /// Whether to launch the new bundle after replacing it.
    #[must_use]
    pub fn relaunch(&self) -> bool {
        self.relaunch
    }

    /// Arguments for the relaunched application.
    #[must_use]
    pub fn relaunch_args(&self) -> &[String] {
        &self.relaunch_args
    }

    /// Version being installed.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Delivers install jobs to the privileged installer.
#[async_trait]
pub trait InstallerDispatcher: Send + Sync {
    /// Hand `job` to the installer.
    ///
    /// Returning `Ok` means the installer accepted the job and the calling
    /// process should expect to be terminated.
    async fn dispatch(&self, job: &InstallJob) -> Result<()>;
}

/// Launches the installer executable as a child process.
///
/// The job is written as JSON to `<job_dir>/install-job.json` and the
/// installer is started with `--job <path>`. It must print
/// [`HANDSHAKE_ACCEPTED`] as its first stdout line once it has taken the job,
/// and should not write to stdout afterwards.
#[derive(Debug, Clone)]
pub struct ProcessInstaller {
    program: PathBuf,
    job_dir: PathBuf,
    handshake_timeout: Duration,
}

impl ProcessInstaller {
    /// Create a dispatcher for the installer at `program`.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        job_dir: impl Into<PathBuf>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            job_dir: job_dir.into(),
            handshake_timeout,
        }
    }

    /// Path the job file is written to.
    #[must_use]
    pub fn job_path(&self) -> PathBuf {
        self.job_dir.join(JOB_FILE)
    }
}

fn preparing(reason: impl std::fmt::Display) -> Error {
    Error::PreparingUpdateJob(reason.to_string())
}

#[async_trait]
impl InstallerDispatcher for ProcessInstaller {
    async fn dispatch(&self, job: &InstallJob) -> Result<()> {
        tokio::fs::create_dir_all(&self.job_dir)
            .await
            .map_err(preparing)?;
        let job_path = self.job_path();
        let encoded = serde_json::to_vec_pretty(job).map_err(preparing)?;
        tokio::fs::write(&job_path, encoded)
            .await
            .map_err(preparing)?;

        debug!(
            "Launching installer {} for job {}",
            self.program.display(),
            job_path.display()
        );

        let mut child = Command::new(&self.program)
            .arg("--job")
            .arg(&job_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                preparing(format!(
                    "failed to launch installer '{}': {e}",
                    self.program.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| preparing("installer stdout unavailable"))?;
        let mut lines = BufReader::new(stdout).lines();

        let first_line = match tokio::time::timeout(self.handshake_timeout, lines.next_line()).await
        {
            Ok(line) => line.map_err(preparing)?,
            Err(_) => {
                warn!("Installer did not acknowledge job, terminating it");
                let _ = child.start_kill();
                return Err(preparing(format!(
                    "installer did not accept the job within {:?}",
                    self.handshake_timeout
                )));
            }
        };

        match first_line.as_deref().map(str::trim) {
            Some(HANDSHAKE_ACCEPTED) => {
                info!(
                    "Installer accepted job for version {} (pid {} will be replaced)",
                    job.version(),
                    job.terminate_pid()
                );
                Ok(())
            }
            Some(other) => {
                let _ = child.start_kill();
                Err(preparing(format!("installer rejected the job: {other}")))
            }
            None => {
                let status = child.wait().await.map_err(preparing)?;
                Err(preparing(format!(
                    "installer exited before accepting the job ({status})"
                )))
            }
        }
    }
}
