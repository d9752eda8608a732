//! Scan coordinator
//!
//! The coordinator owns the scan state table and the outstanding-work
//! counter. The watcher, the periodic re-notifier and the dispatcher's
//! workers all call into it concurrently; it runs no loop of its own apart
//! from the re-notifier timer and the completion pump that turns worker
//! events into state updates.
//!
//! Lifecycle: `Created → Started → Loading → SteadyState → Draining → Stopped`.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::annotator::{Annotator, DigestAnnotator};
use crate::config::ArbiterConfig;
use crate::dispatcher::{Dispatcher, ScanExecutor, WorkerPool};
use crate::hub::{HubBackend, ScanBackend};
use crate::job::{completion_channel, CompletionSender, JobEvent, ScanJob};
use crate::registry::{ImageRegistry, KubeImageRegistry};
use crate::renotifier;
use crate::state::{ImageRecord, ScanStateTable};
use crate::tracker::CompletionTracker;
use crate::watcher::{ImageWatcher, KubeImageWatcher};

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, nothing running
    Created,
    /// Dispatcher, completion pump and re-notifier running
    Started,
    /// Initial registry load and settle wait in progress
    Loading,
    /// Watcher and timer feeding work
    SteadyState,
    /// Waiting for outstanding jobs before shutting down
    Draining,
    /// All background tasks finished
    Stopped,
}

/// External collaborators the coordinator drives.
pub struct Collaborators {
    /// Platform image inventory
    pub registry: Arc<dyn ImageRegistry>,
    /// Platform image event source
    pub watcher: Arc<dyn ImageWatcher>,
    /// Scan job executor
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Scanning backend used for configuration validation
    pub backend: Arc<dyn ScanBackend>,
    /// Identity derivation for new images
    pub annotator: Arc<dyn Annotator>,
}

#[derive(Default)]
struct Tasks {
    workers: Vec<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    renotifier: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

struct Inner {
    config: ArbiterConfig,
    table: ScanStateTable,
    tracker: CompletionTracker,
    registry: Arc<dyn ImageRegistry>,
    watcher: Arc<dyn ImageWatcher>,
    dispatcher: Arc<dyn Dispatcher>,
    backend: Arc<dyn ScanBackend>,
    events: CompletionSender,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<JobEvent>>>,
    lifecycle: watch::Sender<LifecycleState>,
    tasks: Mutex<Tasks>,
    renotifier_stop: CancellationToken,
    shutdown: CancellationToken,
}

/// Shared handle to the scan coordinator. Cloning is cheap.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator in the `Created` state.
    pub fn new(config: ArbiterConfig, collaborators: Collaborators) -> Self {
        let (events, event_rx) = completion_channel();
        let (lifecycle, _) = watch::channel(LifecycleState::Created);

        Self {
            inner: Arc::new(Inner {
                table: ScanStateTable::new(collaborators.annotator),
                tracker: CompletionTracker::new(),
                registry: collaborators.registry,
                watcher: collaborators.watcher,
                dispatcher: collaborators.dispatcher,
                backend: collaborators.backend,
                events,
                event_rx: Mutex::new(Some(event_rx)),
                lifecycle,
                tasks: Mutex::new(Tasks::default()),
                renotifier_stop: CancellationToken::new(),
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Build the production coordinator: OpenShift images through `client`,
    /// a worker pool and the Hub described by `config`.
    pub fn connect(config: ArbiterConfig, client: kube::Client) -> Self {
        let backend: Arc<dyn ScanBackend> =
            Arc::new(HubBackend::new(config.hub.clone(), &config.scanner_version));
        let pool = WorkerPool::new(
            config.queue_capacity,
            config.workers,
            ScanExecutor::new(Arc::clone(&backend)),
        );

        let collaborators = Collaborators {
            registry: Arc::new(KubeImageRegistry::new(client.clone())),
            watcher: Arc::new(KubeImageWatcher::new(client)),
            dispatcher: Arc::new(pool),
            backend,
            annotator: Arc::new(DigestAnnotator),
        };

        Self::new(config, collaborators)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.inner.lifecycle.borrow()
    }

    /// Configuration the coordinator was built with.
    pub fn config(&self) -> &ArbiterConfig {
        &self.inner.config
    }

    /// Number of jobs submitted and not yet completed.
    pub fn outstanding(&self) -> usize {
        self.inner.tracker.outstanding()
    }

    /// Number of tracked images.
    pub async fn image_count(&self) -> usize {
        self.inner.table.len().await
    }

    /// Current record for `reference`.
    pub async fn image(&self, reference: &str) -> Option<ImageRecord> {
        self.inner.table.get(reference).await
    }

    /// Copy of every tracked record.
    pub async fn snapshot(&self) -> Vec<ImageRecord> {
        self.inner.table.snapshot().await
    }

    /// Number of images with a queued job not yet picked up by a worker.
    pub async fn requested_count(&self) -> usize {
        self.inner.table.requested_count().await
    }

    /// Number of images with a job currently held by a worker.
    pub async fn assigned_count(&self) -> usize {
        self.inner.table.assigned_count().await
    }

    fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> bool {
        self.inner.lifecycle.send_if_modified(|state| {
            if from.contains(state) {
                debug!(from = ?*state, to = ?to, "Lifecycle transition");
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Launch the dispatcher, the completion pump and the re-notifier.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        if !self.transition(&[LifecycleState::Created], LifecycleState::Started) {
            warn!(state = ?self.state(), "Arbiter already started");
            return;
        }

        info!("Starting arbiter ....");

        let workers = self
            .inner
            .dispatcher
            .run(self.inner.shutdown.clone())
            .await;

        let pump = self.inner.event_rx.lock().await.take().map(|rx| {
            tokio::spawn(pump_events(
                self.clone(),
                rx,
                self.inner.shutdown.clone(),
            ))
        });

        let renotifier = renotifier::spawn(
            self.clone(),
            self.inner.config.notification_interval(),
            self.inner.renotifier_stop.clone(),
        );

        let mut tasks = self.inner.tasks.lock().await;
        tasks.workers = workers;
        tasks.pump = pump;
        tasks.renotifier = Some(renotifier);
    }

    /// Start the platform watcher for the lifetime of the coordinator.
    #[instrument(skip(self))]
    pub async fn watch(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if tasks.watcher.is_some() {
            warn!("Image watcher already running");
            return;
        }

        info!("Starting watcher ....");
        let watcher = Arc::clone(&self.inner.watcher);
        let coordinator = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tasks.watcher = Some(tokio::spawn(async move {
            watcher.run(coordinator, shutdown).await;
        }));
    }

    /// Register every image the platform currently knows, queue them all for
    /// a notification check, then wait for status updates to settle.
    ///
    /// The settle wait is a heuristic: it returns once no status change has
    /// been recorded for the configured settle window, polling at the
    /// configured interval. Cancelling `cancel` ends the wait early. Registry
    /// failures are logged and treated as an empty inventory.
    #[instrument(skip_all)]
    pub async fn load(&self, cancel: CancellationToken) {
        if self.state() == LifecycleState::Created {
            warn!("Load requested before start, starting arbiter first");
            self.start().await;
        }
        if !self.transition(&[LifecycleState::Started], LifecycleState::Loading) {
            warn!(state = ?self.state(), "Arbiter not in a state to load");
            return;
        }

        info!("Starting load of existing images ...");
        match self.inner.registry.list_images().await {
            Ok(images) if images.is_empty() => info!("No images"),
            Ok(images) => {
                for image in &images {
                    self.register_image(&image.id, &image.reference).await;
                }
            }
            Err(e) => error!(error = %e, "Failed to list images, continuing without a baseline"),
        }

        info!("Done load of existing images. Waiting for initial processing to complete");
        let queued = self.queue_images_for_notification().await;
        self.inner.table.touch().await;

        if self.wait_for_settle(&cancel).await {
            info!(queued, "Initial processing complete.");
        } else {
            info!(queued, "Initial processing wait cancelled");
        }

        self.transition(&[LifecycleState::Loading], LifecycleState::SteadyState);
    }

    async fn wait_for_settle(&self, cancel: &CancellationToken) -> bool {
        let window = self.inner.config.settle_window();
        let poll = self.inner.config.settle_poll();

        loop {
            let quiet = self.inner.table.since_last_scan().await;
            if quiet >= window {
                return true;
            }
            debug!(quiet_secs = quiet.as_secs(), "Waiting for scan status to settle");

            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Stop the re-notifier, wait for every outstanding job, then stop the
    /// workers, the completion pump and the watcher.
    ///
    /// A coordinator that was never started is started first so jobs queued
    /// in the meantime are executed and counted before the drain.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if self.state() == LifecycleState::Created {
            debug!(outstanding = self.outstanding(), "Stop requested before start");
            self.start().await;
        }
        if !self.transition(
            &[
                LifecycleState::Created,
                LifecycleState::Started,
                LifecycleState::Loading,
                LifecycleState::SteadyState,
            ],
            LifecycleState::Draining,
        ) {
            warn!(state = ?self.state(), "Arbiter already stopping");
            return;
        }

        self.inner.renotifier_stop.cancel();
        let renotifier = self.inner.tasks.lock().await.renotifier.take();
        if let Some(handle) = renotifier {
            join_task("renotifier", handle).await;
        }

        info!(
            outstanding = self.outstanding(),
            "Waiting for notification queue to drain before stopping..."
        );
        self.inner.tracker.drain().await;
        info!("Notification queue empty.");

        self.inner.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for handle in tasks.workers {
            join_task("worker", handle).await;
        }
        if let Some(handle) = tasks.pump {
            join_task("completion pump", handle).await;
        }
        if let Some(handle) = tasks.watcher {
            join_task("watcher", handle).await;
        }

        self.transition(&[LifecycleState::Draining], LifecycleState::Stopped);
        info!("Arbiter stopped.");
    }

    /// Track `reference` if it is new. Returns `true` when a record was created.
    pub async fn register_image(&self, id: &str, reference: &str) -> bool {
        self.inner.table.register_image(id, reference).await
    }

    /// Record the outcome of a job for `reference` and count it complete.
    ///
    /// This is the callback for dispatchers that report through the
    /// coordinator instead of the job event channel (see
    /// [`ScanJob::detach`]). It must be called exactly once per submitted
    /// job; an unknown reference is logged and still counts as a completion.
    ///
    /// # Panics
    ///
    /// Panics when no job is outstanding: every call must balance a job
    /// submitted earlier, whether or not its reference is still tracked.
    pub async fn record_completion(&self, reference: &str, success: bool) {
        self.inner.table.record_result(reference, success).await;
        self.inner.tracker.complete();
    }

    async fn complete_job(&self, reference: &str, token: Uuid, success: bool) {
        self.inner
            .table
            .record_job_result(reference, token, success)
            .await;
        self.inner.tracker.complete();
    }

    /// Queue every known image for a notification check.
    ///
    /// Returns how many jobs the dispatcher accepted. A rejected job reports
    /// itself as failed, so the outstanding count stays balanced.
    pub async fn queue_images_for_notification(&self) -> usize {
        let images = self.inner.table.snapshot().await;
        let mut queued = 0;

        for image in images {
            let job = ScanJob::new(
                image.reference.clone(),
                image.digest.clone(),
                self.inner.events.clone(),
            );

            self.inner.tracker.begin();
            self.inner
                .table
                .mark_requested(&image.reference, job.token())
                .await;

            info!(digest = %image.digest, "Queuing for notification check");
            match self.inner.dispatcher.submit(job).await {
                Ok(()) => queued += 1,
                Err(e) => warn!(
                    reference = %image.reference,
                    error = %e,
                    "Failed to queue notification check"
                ),
            }
        }

        queued
    }

    /// Check the Hub configuration by logging in once. The session is always
    /// logged out again.
    #[instrument(skip(self))]
    pub async fn validate_backend_config(&self) -> bool {
        let mut session = self.inner.backend.session();
        let valid = session.login().await;
        session.logout().await;

        if valid {
            info!(hub = %self.inner.config.hub.base_url(), "Hub configuration is valid");
        } else {
            warn!(hub = %self.inner.config.hub.base_url(), "Hub configuration is invalid");
        }
        valid
    }
}

async fn pump_events(
    coordinator: Coordinator,
    mut rx: mpsc::UnboundedReceiver<JobEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Some(JobEvent::Assigned {
                reference,
                token,
                worker,
            }) => {
                coordinator
                    .inner
                    .table
                    .mark_assigned(&reference, token, worker)
                    .await;
            }
            Some(JobEvent::Finished {
                reference,
                token,
                success,
            }) => {
                coordinator.complete_job(&reference, token, success).await;
            }
            None => break,
        }
    }
    debug!("Completion pump stopped");
}

async fn join_task(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(task = name, error = %e, "Background task failed");
    }
}
