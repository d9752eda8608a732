//! Scan state table
//!
//! Authoritative record of every image the arbiter has observed, plus the
//! requested/assigned work maps. All mutation goes through a single
//! [`tokio::sync::Mutex`]; it is only held for map reads and writes, never
//! across queue submission or a Hub call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::annotator::Annotator;

/// Tracked scan state for one image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Image pull reference as reported by the platform (unique key)
    pub reference: String,
    /// Platform identifier
    pub image_id: String,
    /// Content-addressed digest from the annotator
    pub digest: String,
    /// Whether the Hub reported the image as scanned
    pub scanned: bool,
    /// Last status change (creation time until the first result)
    pub last_updated: DateTime<Utc>,
}

/// A queued job that a worker has picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkAssignment {
    /// Token of the job the worker is running
    pub token: Uuid,
    /// Worker slot running the job
    pub worker: usize,
    /// When the worker picked the job up
    pub assigned_at: DateTime<Utc>,
}

struct TableState {
    images: HashMap<String, ImageRecord>,
    requested: HashMap<String, Uuid>,
    assigned: HashMap<String, WorkAssignment>,
    last_scan: Instant,
}

impl TableState {
    fn apply_result(&mut self, reference: &str, result: bool, token: Option<Uuid>) -> bool {
        self.last_scan = Instant::now();

        match token {
            Some(token) => {
                if self.requested.get(reference) == Some(&token) {
                    self.requested.remove(reference);
                }
                if self.assigned.get(reference).is_some_and(|a| a.token == token) {
                    self.assigned.remove(reference);
                }
            }
            None => {
                self.requested.remove(reference);
                self.assigned.remove(reference);
            }
        }

        let Some(image) = self.images.get_mut(reference) else {
            warn!(
                reference = %reference,
                scanned = result,
                "Unknown image reported a scan status"
            );
            return false;
        };

        image.scanned = result;
        image.last_updated = Utc::now();
        info!(reference = %reference, scanned = result, "Set scan status");
        true
    }
}

/// Mapping from image reference to scan record, guarded by one exclusive lock.
pub struct ScanStateTable {
    state: Mutex<TableState>,
    annotator: Arc<dyn Annotator>,
}

impl ScanStateTable {
    /// Create an empty table that derives identities with `annotator`.
    pub fn new(annotator: Arc<dyn Annotator>) -> Self {
        Self {
            state: Mutex::new(TableState {
                images: HashMap::new(),
                requested: HashMap::new(),
                assigned: HashMap::new(),
                last_scan: Instant::now(),
            }),
            annotator,
        }
    }

    /// Insert a record for `reference` unless one already exists.
    ///
    /// Returns `true` when a new record was created. An existing record keeps
    /// its scan status.
    pub async fn register_image(&self, id: &str, reference: &str) -> bool {
        let mut state = self.state.lock().await;

        if state.images.contains_key(reference) {
            debug!(reference = %reference, "Image already tracked");
            return false;
        }

        let identity = self.annotator.identify(id, reference);
        info!(
            reference = %reference,
            digest = %identity.digest,
            "Added image to image map"
        );
        state.images.insert(
            reference.to_string(),
            ImageRecord {
                reference: reference.to_string(),
                image_id: identity.image_id,
                digest: identity.digest,
                scanned: false,
                last_updated: Utc::now(),
            },
        );
        true
    }

    /// Record a scan result and clear every work entry for `reference`.
    ///
    /// Returns `false` for an unknown reference; the table is left unchanged
    /// apart from the last-scan timestamp.
    pub async fn record_result(&self, reference: &str, result: bool) -> bool {
        self.state.lock().await.apply_result(reference, result, None)
    }

    /// Record a scan result reported by the job identified by `token`.
    ///
    /// Work entries are only cleared when they still belong to that job, so a
    /// newer request for the same image survives an older job finishing.
    pub async fn record_job_result(&self, reference: &str, token: Uuid, result: bool) -> bool {
        self.state
            .lock()
            .await
            .apply_result(reference, result, Some(token))
    }

    /// Note that job `token` has been queued for `reference`.
    pub async fn mark_requested(&self, reference: &str, token: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.requested.insert(reference.to_string(), token) {
            debug!(
                reference = %reference,
                previous = %previous,
                token = %token,
                "Superseded queued notification request"
            );
        }
    }

    /// Note that `worker` picked up job `token` for `reference`.
    pub async fn mark_assigned(&self, reference: &str, token: Uuid, worker: usize) {
        let mut state = self.state.lock().await;
        if state.requested.get(reference) == Some(&token) {
            state.requested.remove(reference);
        }
        state.assigned.insert(
            reference.to_string(),
            WorkAssignment {
                token,
                worker,
                assigned_at: Utc::now(),
            },
        );
    }

    /// Cloned view of every record, taken under the lock and released on return.
    pub async fn snapshot(&self) -> Vec<ImageRecord> {
        self.state.lock().await.images.values().cloned().collect()
    }

    /// Current record for `reference`, if tracked.
    pub async fn get(&self, reference: &str) -> Option<ImageRecord> {
        self.state.lock().await.images.get(reference).cloned()
    }

    /// Number of tracked images.
    pub async fn len(&self) -> usize {
        self.state.lock().await.images.len()
    }

    /// Whether no images are tracked.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.images.is_empty()
    }

    /// Number of references with a queued, not yet assigned job.
    pub async fn requested_count(&self) -> usize {
        self.state.lock().await.requested.len()
    }

    /// Number of references with a job currently held by a worker.
    pub async fn assigned_count(&self) -> usize {
        self.state.lock().await.assigned.len()
    }

    /// Current assignment for `reference`, if any.
    pub async fn assignment(&self, reference: &str) -> Option<WorkAssignment> {
        self.state.lock().await.assigned.get(reference).cloned()
    }

    /// Refresh the last-scan timestamp without changing any record.
    pub async fn touch(&self) {
        self.state.lock().await.last_scan = Instant::now();
    }

    /// Time elapsed since the last recorded status change.
    pub async fn since_last_scan(&self) -> Duration {
        self.state.lock().await.last_scan.elapsed()
    }
}
