//! Error types for bundle-updater.

use bytes::Bytes;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while checking for, verifying or installing updates.
#[derive(Debug, Error)]
pub enum Error {
    /// The server sent a response that we didn't understand.
    #[error("invalid server response (status {status}, {} bytes)", .body.len())]
    InvalidServerResponse {
        /// HTTP status code of the response.
        status: u16,
        /// Raw response body.
        body: Bytes,
    },

    /// The server sent a response body that could not be decoded.
    #[error("invalid server body: {reason}")]
    InvalidServerBody {
        /// Raw response body.
        body: Bytes,
        /// Why decoding failed.
        reason: String,
    },

    /// The server sent update JSON that we didn't understand.
    #[error("invalid update JSON: {source}")]
    InvalidJson {
        /// Raw response body.
        body: Bytes,
        /// The JSON object, if the body parsed as JSON at all.
        object: Option<serde_json::Value>,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The downloaded update does not contain an app bundle, or it was deleted
    /// on disk before it could be verified.
    #[error("update bundle missing: {}", .0.display())]
    MissingUpdateBundle(PathBuf),

    /// The code signing requirement of the running application could not be
    /// retrieved.
    #[error("could not retrieve code signing requirement: {0}")]
    RetrievingCodeSigningRequirement(String),

    /// The update bundle's signature does not satisfy the running application's
    /// code signing requirement.
    #[error("signature of {} does not satisfy requirement: {reason}", .bundle.display())]
    SignatureMismatch {
        /// Bundle that failed verification.
        bundle: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The out-of-process installer failed while setting up the job.
    #[error("failed to prepare update job: {0}")]
    PreparingUpdateJob(String),

    /// The HTTP request for the update feed could not be completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// None of the update's download locations could be fetched.
    #[error("download of {url} failed: {reason}")]
    Download {
        /// Last location attempted.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The downloaded package could not be unpacked.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A version string could not be parsed.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fieldless classification of [`Error`], for observers and hosts that only
/// need to branch on what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::InvalidServerResponse`].
    InvalidServerResponse,
    /// See [`Error::InvalidServerBody`].
    InvalidServerBody,
    /// See [`Error::InvalidJson`].
    InvalidJson,
    /// See [`Error::MissingUpdateBundle`].
    MissingUpdateBundle,
    /// See [`Error::RetrievingCodeSigningRequirement`].
    RetrievingCodeSigningRequirement,
    /// See [`Error::SignatureMismatch`].
    SignatureMismatch,
    /// See [`Error::PreparingUpdateJob`].
    PreparingUpdateJob,
    /// See [`Error::Transport`].
    Transport,
    /// See [`Error::Download`].
    Download,
    /// See [`Error::Extraction`].
    Extraction,
    /// See [`Error::InvalidVersion`].
    InvalidVersion,
    /// See [`Error::Config`].
    Config,
    /// See [`Error::Io`].
    Io,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidServerResponse { .. } => ErrorKind::InvalidServerResponse,
            Self::InvalidServerBody { .. } => ErrorKind::InvalidServerBody,
            Self::InvalidJson { .. } => ErrorKind::InvalidJson,
            Self::MissingUpdateBundle(_) => ErrorKind::MissingUpdateBundle,
            Self::RetrievingCodeSigningRequirement(_) => {
                ErrorKind::RetrievingCodeSigningRequirement
            }
            Self::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            Self::PreparingUpdateJob(_) => ErrorKind::PreparingUpdateJob,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Download { .. } => ErrorKind::Download,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::InvalidVersion(_) => ErrorKind::InvalidVersion,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Raw bytes received from the server, for errors that carry them.
    #[must_use]
    pub fn server_data(&self) -> Option<&Bytes> {
        match self {
            Self::InvalidServerResponse { body, .. }
            | Self::InvalidServerBody { body, .. }
            | Self::InvalidJson { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The JSON object received from the server, for [`Error::InvalidJson`].
    #[must_use]
    pub fn json_object(&self) -> Option<&serde_json::Value> {
        match self {
            Self::InvalidJson { object, .. } => object.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn mismatch(bundle: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SignatureMismatch {
            bundle: bundle.into(),
            reason: reason.into(),
        }
    }
}
