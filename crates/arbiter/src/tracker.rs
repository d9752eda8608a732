//! Outstanding-work counter used to drain the job queue on shutdown.

use tokio::sync::watch;
use tracing::debug;

/// Counts scan jobs that were submitted but have not completed.
///
/// `begin` is called once per job before it reaches the dispatcher and
/// `complete` once per job after its result is recorded. `drain` resolves when
/// the count returns to zero.
pub struct CompletionTracker {
    outstanding: watch::Sender<usize>,
}

impl CompletionTracker {
    /// Create a tracker with no outstanding work.
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self { outstanding }
    }

    /// Count one more outstanding job.
    pub fn begin(&self) {
        self.outstanding.send_modify(|count| *count += 1);
    }

    /// Count one job as finished.
    ///
    /// # Panics
    ///
    /// Panics when called more often than [`begin`](Self::begin); the
    /// counter has desynchronized from the jobs it tracks.
    pub fn complete(&self) {
        let mut underflow = false;
        self.outstanding.send_if_modified(|count| match count.checked_sub(1) {
            Some(next) => {
                *count = next;
                true
            }
            None => {
                underflow = true;
                false
            }
        });

        assert!(
            !underflow,
            "completion tracker underflow: complete() called without a matching begin()"
        );
    }

    /// Number of jobs currently outstanding.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until no jobs are outstanding.
    pub async fn drain(&self) {
        let mut rx = self.outstanding.subscribe();
        let pending = *rx.borrow();
        debug!(outstanding = pending, "Draining scan jobs");
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}
