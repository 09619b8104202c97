//! Polling rebuild loop.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use weld_cache::tree_fingerprint;

use crate::error::DriverError;
use crate::report::BuildReport;
use crate::session::Session;

/// Longest single sleep between cancellation checks.
const POLL_SLICE: Duration = Duration::from_millis(50);

impl Session {
    /// Runs a quick build now and again whenever the project tree changes.
    ///
    /// The tree is re-fingerprinted every `interval`. Each report is handed
    /// to `on_build`; returning [`ControlFlow::Break`] stops the loop, as
    /// does cancelling the session's [`cancel_token`](Self::cancel_token).
    pub fn watch(
        &self,
        interval: Duration,
        on_build: impl FnMut(&BuildReport) -> ControlFlow<()>,
    ) -> Result<(), DriverError> {
        let result = self.watch_until_stopped(interval, on_build);
        self.cancel.reset();
        result
    }

    fn watch_until_stopped(
        &self,
        interval: Duration,
        mut on_build: impl FnMut(&BuildReport) -> ControlFlow<()>,
    ) -> Result<(), DriverError> {
        let mut fingerprint = tree_fingerprint(&self.root)?;
        info!(target: "watch", root = %self.root.display(), "watching for changes");
        if on_build(&self.quick_build_keeping_cancel()?).is_break() {
            return Ok(());
        }

        loop {
            if !self.sleep(interval) {
                debug!(target: "watch", "watch cancelled");
                return Ok(());
            }
            let current = tree_fingerprint(&self.root)?;
            if current == fingerprint {
                continue;
            }
            info!(target: "watch", %current, "change detected");
            fingerprint = current;
            if on_build(&self.quick_build_keeping_cancel()?).is_break() {
                return Ok(());
            }
        }
    }

    /// Sleeps for `duration`; returns `false` early if the session is cancelled.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }
}
