//! Updater event system.

use crate::error::ErrorKind;
use tokio::sync::broadcast;

/// Events emitted by the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdaterEvent {
    /// A check started.
    CheckStarted,

    /// The server has nothing newer.
    UpToDate,

    /// A newer release was found and is being downloaded.
    UpdateAvailable {
        /// Advertised version.
        version: String,
    },

    /// The update was verified and handed to the installer.
    UpdateDispatched {
        /// Version being installed.
        version: String,
    },

    /// A check failed.
    CheckFailed {
        /// What went wrong.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

/// Channel for receiving updater events.
pub type UpdaterEventsChannel = broadcast::Receiver<UpdaterEvent>;

/// Sender for updater events.
pub type UpdaterEventsSender = broadcast::Sender<UpdaterEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (UpdaterEventsSender, UpdaterEventsChannel) {
    broadcast::channel(256)
}
