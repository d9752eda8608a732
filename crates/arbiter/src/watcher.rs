//! Platform image watcher.

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::registry::{image_from_object, openshift_image_api};

/// Delivers newly observed images to the coordinator.
#[async_trait]
pub trait ImageWatcher: Send + Sync {
    /// Register images with `coordinator` as they appear, until `shutdown`
    /// is cancelled.
    async fn run(&self, coordinator: Coordinator, shutdown: CancellationToken);
}

/// Watches OpenShift `Image` objects through the Kubernetes API.
#[derive(Clone)]
pub struct KubeImageWatcher {
    client: Client,
}

impl KubeImageWatcher {
    /// Create a watcher over `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageWatcher for KubeImageWatcher {
    async fn run(&self, coordinator: Coordinator, shutdown: CancellationToken) {
        info!("Starting image watcher");

        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &openshift_image_api());
        let stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .applied_objects();
        let mut stream = std::pin::pin!(stream);

        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(object)) => {
                    if let Some(image) = image_from_object(&object) {
                        debug!(reference = %image.reference, "Image event");
                        coordinator
                            .register_image(&image.id, &image.reference)
                            .await;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Image watch error, retrying with backoff");
                }
                None => {
                    warn!("Image watch stream ended");
                    break;
                }
            }
        }

        info!("Image watcher stopped");
    }
}
