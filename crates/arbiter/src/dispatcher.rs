//! Scan job dispatcher.
//!
//! [`WorkerPool`] is a bounded queue feeding a fixed number of worker tasks.
//! A full queue makes [`Dispatcher::submit`] wait, which is the only
//! backpressure the arbiter applies.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::error::{ArbiterError, Result};
use crate::hub::ScanBackend;
use crate::job::ScanJob;

/// Consumes scan jobs and executes them concurrently.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Start executing queued jobs until `shutdown` is cancelled.
    ///
    /// Returns the handles of any tasks started so the caller can await them.
    async fn run(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>>;

    /// Queue a job, waiting for capacity if the queue is full.
    async fn submit(&self, job: ScanJob) -> Result<()>;
}

/// Runs one notification check against the scanning backend.
pub struct ScanExecutor {
    backend: Arc<dyn ScanBackend>,
}

impl ScanExecutor {
    /// Create an executor over `backend`.
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        Self { backend }
    }

    /// Log in, check `digest`, log out. The session is always released.
    pub async fn execute(&self, digest: &str) -> bool {
        let mut session = self.backend.session();

        let result = if session.login().await {
            session.check_notification(digest).await
        } else {
            warn!(digest = %digest, "Skipping notification check, Hub login failed");
            false
        };

        session.logout().await;
        result
    }
}

/// Bounded job queue served by a fixed set of worker tasks.
pub struct WorkerPool {
    tx: mpsc::Sender<ScanJob>,
    rx: Mutex<Option<mpsc::Receiver<ScanJob>>>,
    workers: usize,
    executor: Arc<ScanExecutor>,
}

impl WorkerPool {
    /// Create a pool with a queue of `capacity` jobs (at least one) and
    /// `workers` worker tasks (at least one).
    pub fn new(capacity: usize, workers: usize, executor: ScanExecutor) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            workers: workers.max(1),
            executor: Arc::new(executor),
        }
    }

    /// Number of worker tasks started by [`Dispatcher::run`].
    pub fn workers(&self) -> usize {
        self.workers
    }
}

async fn work(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<ScanJob>>>,
    executor: Arc<ScanExecutor>,
    shutdown: CancellationToken,
) {
    debug!("Worker started");
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };

        job.assigned(worker);
        debug!(reference = %job.reference(), digest = %job.digest(), "Processing notification check");
        let success = executor.execute(job.digest()).await;
        job.finish(success);
    }
    debug!("Worker stopped");
}

#[async_trait]
impl Dispatcher for WorkerPool {
    async fn run(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let Some(rx) = self.rx.lock().await.take() else {
            warn!("Worker pool already running");
            return Vec::new();
        };

        info!(workers = self.workers, "Starting scan workers");
        let rx = Arc::new(Mutex::new(rx));

        (0..self.workers)
            .map(|worker| {
                let span = tracing::info_span!("scan_worker", worker);
                tokio::spawn(
                    work(
                        worker,
                        Arc::clone(&rx),
                        Arc::clone(&self.executor),
                        shutdown.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect()
    }

    async fn submit(&self, job: ScanJob) -> Result<()> {
        self.tx.send(job).await.map_err(|_| ArbiterError::QueueClosed)
    }
}
