//! Test doubles for the arbiter's collaborators.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbiter::{
    ArbiterConfig, ArbiterError, BackendSession, Collaborators, Coordinator, DigestAnnotator,
    Dispatcher, ImageRegistry, ImageWatcher, PlatformImage, Result, ScanBackend, ScanJob,
};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn image(n: usize) -> PlatformImage {
    PlatformImage {
        id: format!("sha256:{n:064x}"),
        reference: format!("172.30.1.1:5000/demo/app-{n}@sha256:{n:064x}"),
    }
}

pub fn images(count: usize) -> Vec<PlatformImage> {
    (0..count).map(image).collect()
}

pub fn config() -> ArbiterConfig {
    let mut config = ArbiterConfig::default();
    config.hub.host = "hub.example.com".to_string();
    config
}

/// Registry returning a fixed list.
pub struct StaticRegistry(pub Vec<PlatformImage>);

#[async_trait]
impl ImageRegistry for StaticRegistry {
    async fn list_images(&self) -> Result<Vec<PlatformImage>> {
        Ok(self.0.clone())
    }
}

/// Registry whose API is unreachable.
pub struct FailingRegistry;

#[async_trait]
impl ImageRegistry for FailingRegistry {
    async fn list_images(&self) -> Result<Vec<PlatformImage>> {
        Err(ArbiterError::Io(std::io::Error::other("connection refused")))
    }
}

/// Watcher that delivers a fixed list of images, then idles until shutdown.
pub struct ScriptedWatcher {
    pub images: Vec<PlatformImage>,
    pub stopped: Arc<AtomicBool>,
}

impl ScriptedWatcher {
    pub fn new(images: Vec<PlatformImage>) -> Self {
        Self {
            images,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl ImageWatcher for ScriptedWatcher {
    async fn run(&self, coordinator: Coordinator, shutdown: CancellationToken) {
        for image in &self.images {
            coordinator.register_image(&image.id, &image.reference).await;
        }
        shutdown.cancelled().await;
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Dispatcher that holds every job it receives.
#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<ScanJob>>,
    submitted: AtomicUsize,
}

impl RecordingDispatcher {
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn take_jobs(&self) -> Vec<ScanJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn run(&self, _shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    async fn submit(&self, job: ScanJob) -> Result<()> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Dispatcher that finishes the n-th job `n * step` after it was submitted.
pub struct DelayedDispatcher {
    step: Duration,
    submitted: AtomicUsize,
}

impl DelayedDispatcher {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            submitted: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Dispatcher for DelayedDispatcher {
    async fn run(&self, _shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    async fn submit(&self, job: ScanJob) -> Result<()> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.step * u32::try_from(n).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.finish(true);
        });
        Ok(())
    }
}

/// Backend whose sessions always answer the same way.
#[derive(Default)]
pub struct StaticBackend {
    pub login: bool,
    pub scanned: bool,
    pub logins: Arc<AtomicUsize>,
    pub logouts: Arc<AtomicUsize>,
}

impl StaticBackend {
    pub fn new(login: bool, scanned: bool) -> Self {
        Self {
            login,
            scanned,
            ..Self::default()
        }
    }
}

struct StaticSession {
    login: bool,
    scanned: bool,
    logins: Arc<AtomicUsize>,
    logouts: Arc<AtomicUsize>,
}

#[async_trait]
impl BackendSession for StaticSession {
    async fn login(&mut self) -> bool {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.login
    }

    async fn logout(&mut self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
    }

    async fn check_notification(&mut self, _digest: &str) -> bool {
        self.scanned
    }
}

impl ScanBackend for StaticBackend {
    fn session(&self) -> Box<dyn BackendSession> {
        Box::new(StaticSession {
            login: self.login,
            scanned: self.scanned,
            logins: Arc::clone(&self.logins),
            logouts: Arc::clone(&self.logouts),
        })
    }
}

pub struct Harness {
    pub registry: Arc<dyn ImageRegistry>,
    pub watcher: Arc<dyn ImageWatcher>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub backend: Arc<dyn ScanBackend>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            registry: Arc::new(StaticRegistry(Vec::new())),
            watcher: Arc::new(ScriptedWatcher::new(Vec::new())),
            dispatcher: Arc::new(RecordingDispatcher::default()),
            backend: Arc::new(StaticBackend::new(true, true)),
        }
    }
}

impl Harness {
    pub fn build(self) -> Coordinator {
        Coordinator::new(
            config(),
            Collaborators {
                registry: self.registry,
                watcher: self.watcher,
                dispatcher: self.dispatcher,
                backend: self.backend,
                annotator: Arc::new(DigestAnnotator),
            },
        )
    }
}

/// Coordinator wired to a [`RecordingDispatcher`] the test can inspect.
pub fn recording_coordinator() -> (Coordinator, Arc<RecordingDispatcher>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let coordinator = Harness {
        dispatcher: Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
        ..Harness::default()
    }
    .build();
    (coordinator, dispatcher)
}
