//! Package download and extraction.
//!
//! Update packages are gzip-compressed tarballs containing the application
//! bundle. They are unpacked into a private temporary directory under the
//! configured download directory; the directory is removed again unless the
//! update makes it all the way to the installer.

use crate::error::{Error, Result};
use crate::update::transport::HttpTransport;
use crate::update::ReleaseInfo;
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// File name the package is downloaded to inside the work directory.
const PACKAGE_FILE: &str = "update.tar.gz";

/// Directory the package is unpacked into inside the work directory.
const EXTRACT_DIR: &str = "contents";

/// Extension identifying an application bundle directory.
const BUNDLE_EXTENSION: &str = "app";

/// An update whose package has been downloaded and unpacked, but not yet
/// verified.
#[derive(Debug)]
pub struct DownloadedUpdate<U> {
    update: U,
    bundle: PathBuf,
    workdir: TempDir,
}

impl<U> DownloadedUpdate<U> {
    /// Wrap an already unpacked bundle living inside `workdir`.
    #[must_use]
    pub fn new(update: U, bundle: PathBuf, workdir: TempDir) -> Self {
        Self {
            update,
            bundle,
            workdir,
        }
    }

    /// The release this package belongs to.
    #[must_use]
    pub fn update(&self) -> &U {
        &self.update
    }

    /// Location of the unpacked application bundle.
    #[must_use]
    pub fn bundle_path(&self) -> &Path {
        &self.bundle
    }

    pub(crate) fn into_parts(self) -> (U, PathBuf, TempDir) {
        (self.update, self.bundle, self.workdir)
    }
}

/// Download the package for `update` and unpack it under `download_dir`.
///
/// Download locations are tried in order; the first one that succeeds is
/// used.
///
/// # Errors
///
/// - [`Error::Download`] if no location could be fetched
/// - [`Error::Extraction`] if the package is not a readable tarball
/// - [`Error::MissingUpdateBundle`] if the package contains no bundle
pub async fn download_update<U: ReleaseInfo>(
    transport: &dyn HttpTransport,
    update: U,
    download_dir: &Path,
) -> Result<DownloadedUpdate<U>> {
    tokio::fs::create_dir_all(download_dir).await?;
    let workdir = tempfile::Builder::new()
        .prefix("update-")
        .tempdir_in(download_dir)?;
    let package = workdir.path().join(PACKAGE_FILE);

    let urls = update.download_urls();
    let Some(first) = urls.first() else {
        return Err(Error::Download {
            url: "<none>".to_string(),
            reason: format!("release {} lists no download locations", update.version()),
        });
    };
    let mut last_error = Error::Download {
        url: first.to_string(),
        reason: "not attempted".to_string(),
    };
    let mut downloaded = false;
    for url in &urls {
        match transport.download(url, &package).await {
            Ok(()) => {
                info!("Downloaded update {} from {url}", update.version());
                downloaded = true;
                break;
            }
            Err(e) => {
                warn!("Download from {url} failed: {e}");
                last_error = e;
            }
        }
    }
    if !downloaded {
        return Err(last_error);
    }

    let target = workdir.path().join(EXTRACT_DIR);
    let bundle = tokio::task::spawn_blocking(move || {
        unpack(&package, &target)?;
        find_bundle(&target)
    })
    .await
    .map_err(|e| Error::Extraction(format!("extraction task failed: {e}")))??;

    debug!("Update bundle located at {}", bundle.display());
    Ok(DownloadedUpdate::new(update, bundle, workdir))
}

/// Unpack a `.tar.gz` archive into `target`.
fn unpack(package: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let file = fs::File::open(package)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(target)
        .map_err(|e| Error::Extraction(format!("{}: {e}", package.display())))
}

/// Locate the application bundle inside an unpacked package.
///
/// Prefers the first top-level `*.app` directory; otherwise accepts a sole
/// top-level directory.
pub(crate) fn find_bundle(root: &Path) -> Result<PathBuf> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    if let Some(app) = dirs
        .iter()
        .find(|p| p.extension().is_some_and(|ext| ext == BUNDLE_EXTENSION))
    {
        return Ok(app.clone());
    }

    match dirs.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(Error::MissingUpdateBundle(root.to_path_buf())),
    }
}
