//! Periodic update checks.

use crate::error::{Error, Result};
use crate::update::{CheckOutcome, ReleaseInfo, Updater};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Handle to a running schedule of automatic checks.
///
/// Cancelling (or dropping) the handle stops future checks. A check that is
/// already running is left to finish.
#[derive(Debug)]
pub struct AutomaticChecks {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    interval: Duration,
}

impl AutomaticChecks {
    /// Stop scheduling checks. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel_tx.send_replace(true) {
            debug!("Automatic checks every {:?} cancelled", self.interval);
        }
    }

    /// Whether [`AutomaticChecks::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Interval between checks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the scheduling task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutomaticChecks {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<U: ReleaseInfo> Updater<U> {
    /// Run [`Updater::check_for_updates`] every `interval`, starting one
    /// `interval` from now.
    ///
    /// Ticks that land while a check is in flight are dropped by the state
    /// gate. Failed checks are reported as usual and do not stop the
    /// schedule. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `interval` is zero.
    pub fn start_automatic_checks(&self, interval: Duration) -> Result<AutomaticChecks> {
        if interval.is_zero() {
            return Err(Error::Config(
                "automatic check interval must be non-zero".to_string(),
            ));
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let updater = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        // Cancelling the schedule must not abort a running check.
                        let updater = updater.clone();
                        tokio::spawn(async move {
                            match updater.check_for_updates().await {
                                Ok(CheckOutcome::AlreadyChecking) => {
                                    debug!("Scheduled check skipped, one is already running");
                                }
                                Ok(_) => {}
                                Err(e) => debug!("Scheduled check failed: {e}"),
                            }
                        });
                    }
                }
            }

            debug!("Automatic check loop stopped");
        });

        info!("Automatic update checks every {interval:?}");
        Ok(AutomaticChecks {
            cancel_tx,
            task,
            interval,
        })
    }
}
