//! ML-DSA code signature verification for application bundles.
//!
//! A signed bundle carries a `_CodeSignature` directory holding the signer's
//! ML-DSA-65 public key and a signature over the bundle's resource manifest
//! (see [`resource_manifest`]): every directory and regular file outside
//! `_CodeSignature`, with file digests and executable bits.
//!
//! The running application's requirement is simply "signed by the same key
//! that signed me". It is read once from the running bundle; candidate
//! bundles are always checked against that key, never against whatever key
//! they ship themselves.

use crate::error::{Error, Result};
use crate::update::download::DownloadedUpdate;
use saorsa_pqc::api::sig::{ml_dsa_65, MlDsaPublicKey, MlDsaSignature, MlDsaVariant};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Signing context for domain separation (prevents cross-protocol attacks).
pub const SIGNING_CONTEXT: &[u8] = b"bundle-updater-codesign-v1";

/// ML-DSA-65 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 3309;

/// ML-DSA-65 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 1952;

/// Directory inside a bundle holding its code signature.
pub const SIGNATURE_DIR: &str = "_CodeSignature";

/// Signature file inside [`SIGNATURE_DIR`].
pub const SIGNATURE_FILE: &str = "signature";

/// Signer public key file inside [`SIGNATURE_DIR`].
pub const SIGNER_KEY_FILE: &str = "signer.pub";

/// The trust predicate derived from the running application's own signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSigningRequirement {
    signer_key: Vec<u8>,
    fingerprint: String,
}

impl CodeSigningRequirement {
    /// Require signatures by the given ML-DSA-65 public key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetrievingCodeSigningRequirement`] if the key is malformed.
    pub fn from_public_key(key: &[u8]) -> Result<Self> {
        if key.len() != PUBLIC_KEY_SIZE {
            return Err(Error::RetrievingCodeSigningRequirement(format!(
                "invalid signer key size: expected {PUBLIC_KEY_SIZE}, got {}",
                key.len()
            )));
        }
        MlDsaPublicKey::from_bytes(MlDsaVariant::MlDsa65, key).map_err(|e| {
            Error::RetrievingCodeSigningRequirement(format!("invalid signer key: {e}"))
        })?;

        Ok(Self {
            signer_key: key.to_vec(),
            fingerprint: hex::encode(Sha256::digest(key)),
        })
    }

    /// Derive the requirement from the running application's bundle.
    ///
    /// The bundle's own signature must verify with the key it names, so an
    /// unsigned or tampered running copy yields no requirement at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetrievingCodeSigningRequirement`] if the bundle has no
    /// usable signer key or its signature does not verify.
    pub fn for_running_bundle(bundle: &Path) -> Result<Self> {
        let key_path = bundle.join(SIGNATURE_DIR).join(SIGNER_KEY_FILE);
        let key = fs::read(&key_path).map_err(|e| {
            Error::RetrievingCodeSigningRequirement(format!(
                "failed to read '{}': {e}",
                key_path.display()
            ))
        })?;

        let requirement = Self::from_public_key(&key)?;
        verify_bundle(bundle, &requirement).map_err(|e| {
            Error::RetrievingCodeSigningRequirement(format!(
                "running bundle '{}' does not satisfy its own signature: {e}",
                bundle.display()
            ))
        })?;

        info!(
            "Code signing requirement: signer {}",
            requirement.fingerprint()
        );
        Ok(requirement)
    }

    /// SHA-256 fingerprint (hex) of the required signer key.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn public_key(&self) -> Result<MlDsaPublicKey> {
        MlDsaPublicKey::from_bytes(MlDsaVariant::MlDsa65, &self.signer_key).map_err(|e| {
            Error::RetrievingCodeSigningRequirement(format!("invalid signer key: {e}"))
        })
    }
}

/// An update whose bundle satisfied the code signing requirement.
///
/// Only [`verify`] produces this type, and the installer only accepts it.
#[derive(Debug)]
pub struct VerifiedUpdate<U> {
    update: U,
    bundle: PathBuf,
    workdir: TempDir,
}

impl<U> VerifiedUpdate<U> {
    /// The release this bundle belongs to.
    #[must_use]
    pub fn update(&self) -> &U {
        &self.update
    }

    /// Location of the verified bundle.
    #[must_use]
    pub fn bundle_path(&self) -> &Path {
        &self.bundle
    }

    pub(crate) fn into_parts(self) -> (U, PathBuf, TempDir) {
        (self.update, self.bundle, self.workdir)
    }
}

/// Verify a downloaded update against `requirement`.
///
/// Consumes the download; on failure its working directory is removed.
///
/// # Errors
///
/// - [`Error::MissingUpdateBundle`] if the bundle is gone from disk
/// - [`Error::SignatureMismatch`] if the signature is absent, malformed,
///   made by another key, or does not cover the bundle's current contents
pub fn verify<U>(
    downloaded: DownloadedUpdate<U>,
    requirement: &CodeSigningRequirement,
) -> Result<VerifiedUpdate<U>> {
    let (update, bundle, workdir) = downloaded.into_parts();

    if !bundle.is_dir() {
        warn!("Update bundle {} vanished before verification", bundle.display());
        return Err(Error::MissingUpdateBundle(bundle));
    }

    verify_bundle(&bundle, requirement)?;

    info!(
        "Update bundle {} satisfies signer {}",
        bundle.display(),
        requirement.fingerprint()
    );
    Ok(VerifiedUpdate {
        update,
        bundle,
        workdir,
    })
}

/// Check the signature in `bundle` against `requirement`.
fn verify_bundle(bundle: &Path, requirement: &CodeSigningRequirement) -> Result<()> {
    debug!("Verifying code signature of {}", bundle.display());

    let sig_path = bundle.join(SIGNATURE_DIR).join(SIGNATURE_FILE);
    let signature = match fs::read(&sig_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::mismatch(bundle, "bundle is not signed"));
        }
        Err(e) => {
            return Err(Error::mismatch(
                bundle,
                format!("failed to read signature: {e}"),
            ))
        }
    };

    if signature.len() != SIGNATURE_SIZE {
        return Err(Error::mismatch(
            bundle,
            format!(
                "invalid signature size: expected {SIGNATURE_SIZE}, got {}",
                signature.len()
            ),
        ));
    }

    let sig = MlDsaSignature::from_bytes(MlDsaVariant::MlDsa65, &signature)
        .map_err(|e| Error::mismatch(bundle, format!("invalid signature format: {e}")))?;

    let manifest = resource_manifest(bundle)?;
    let public_key = requirement.public_key()?;

    let valid = ml_dsa_65()
        .verify_with_context(&public_key, &manifest, &sig, SIGNING_CONTEXT)
        .map_err(|e| Error::mismatch(bundle, format!("signature verification error: {e}")))?;

    if valid {
        debug!("Signature verified successfully");
        Ok(())
    } else {
        Err(Error::mismatch(
            bundle,
            "signature was not made by the required signer over these contents",
        ))
    }
}

/// Build the resource manifest that a bundle's signature covers.
///
/// One line per entry outside `_CodeSignature`, sorted by relative path:
///
/// ```text
/// d <path>
/// f <x|-> <sha256-hex> <path>
/// ```
///
/// `x` marks an executable file. Paths must be UTF-8 without control
/// characters, so every line parses back to exactly one entry.
///
/// # Errors
///
/// Returns [`Error::SignatureMismatch`] if the bundle cannot be read or
/// contains entries that cannot be signed (symlinks, devices, sockets, or
/// names that cannot be encoded).
pub fn resource_manifest(bundle: &Path) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    collect_entries(bundle, bundle, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut manifest = Vec::new();
    for entry in entries {
        let line = match entry.kind {
            EntryKind::Dir => format!("d {}\n", entry.path),
            EntryKind::File { executable, digest } => format!(
                "f {} {digest} {}\n",
                if executable { 'x' } else { '-' },
                entry.path
            ),
        };
        manifest.extend_from_slice(line.as_bytes());
    }
    Ok(manifest)
}

struct ManifestEntry {
    path: String,
    kind: EntryKind,
}

enum EntryKind {
    Dir,
    File { executable: bool, digest: String },
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<ManifestEntry>) -> Result<()> {
    let unreadable = |e: io::Error| Error::mismatch(root, format!("failed to read bundle: {e}"));

    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(unreadable)?;

        if dir == root && entry.file_name() == SIGNATURE_DIR {
            continue;
        }

        if file_type.is_dir() {
            out.push(ManifestEntry {
                path: manifest_path(root, &path)?,
                kind: EntryKind::Dir,
            });
            collect_entries(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = manifest_path(root, &path)?;
            let metadata = entry.metadata().map_err(unreadable)?;

            let mut hasher = Sha256::new();
            let mut file = fs::File::open(&path).map_err(unreadable)?;
            io::copy(&mut file, &mut hasher).map_err(unreadable)?;
            out.push(ManifestEntry {
                path: relative,
                kind: EntryKind::File {
                    executable: is_executable(&metadata),
                    digest: hex::encode(hasher.finalize()),
                },
            });
        } else {
            return Err(Error::mismatch(
                root,
                format!("unsupported entry in bundle: {}", path.display()),
            ));
        }
    }
    Ok(())
}

/// `/`-separated path of `path` relative to `root`.
fn manifest_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| Error::mismatch(root, e.to_string()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            Error::mismatch(
                root,
                format!("non UTF-8 name in bundle: {}", path.display()),
            )
        })?;
        if part.chars().any(char::is_control) {
            return Err(Error::mismatch(
                root,
                format!("control character in bundle entry name: {part:?}"),
            ));
        }
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
