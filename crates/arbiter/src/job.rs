//! Scan jobs and the channel workers use to report on them.

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Progress reported by a worker for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker picked the job up.
    Assigned {
        reference: String,
        token: Uuid,
        worker: usize,
    },
    /// The job finished, successfully or not.
    Finished {
        reference: String,
        token: Uuid,
        success: bool,
    },
}

/// Sending half of the job event channel; cloned into every job.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl CompletionSender {
    fn send(&self, event: JobEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(event = ?e.0, "Job event dropped, completion receiver is gone");
        }
    }
}

/// Create the job event channel.
///
/// The channel is unbounded so a worker never blocks on reporting a result.
pub fn completion_channel() -> (CompletionSender, mpsc::UnboundedReceiver<JobEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, rx)
}

/// One notification check for one image.
///
/// A job reports `Finished` exactly once: through [`finish`](Self::finish),
/// or as a failure when it is dropped unfinished.
#[derive(Debug)]
pub struct ScanJob {
    token: Uuid,
    reference: String,
    digest: String,
    events: CompletionSender,
    finished: bool,
}

impl ScanJob {
    /// Create a job with a fresh work token.
    pub fn new(
        reference: impl Into<String>,
        digest: impl Into<String>,
        events: CompletionSender,
    ) -> Self {
        Self {
            token: Uuid::new_v4(),
            reference: reference.into(),
            digest: digest.into(),
            events,
            finished: false,
        }
    }

    /// Work token identifying this job.
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Image reference the job checks.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Digest sent to the Hub.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Report that `worker` picked the job up.
    pub fn assigned(&self, worker: usize) {
        self.events.send(JobEvent::Assigned {
            reference: self.reference.clone(),
            token: self.token,
            worker,
        });
    }

    /// Report the job's outcome.
    pub fn finish(mut self, success: bool) {
        self.finished = true;
        self.events.send(JobEvent::Finished {
            reference: std::mem::take(&mut self.reference),
            token: self.token,
            success,
        });
    }

    /// Take the job off the event channel and return `(reference, digest)`.
    ///
    /// The caller must then report the outcome exactly once through
    /// [`Coordinator::record_completion`](crate::Coordinator::record_completion).
    pub fn detach(mut self) -> (String, String) {
        self.finished = true;
        (
            std::mem::take(&mut self.reference),
            std::mem::take(&mut self.digest),
        )
    }
}

impl Drop for ScanJob {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!(reference = %self.reference, token = %self.token, "Scan job dropped unfinished");
        self.events.send(JobEvent::Finished {
            reference: std::mem::take(&mut self.reference),
            token: self.token,
            success: false,
        });
    }
}
