//! Scan arbiter for platform container images.
//!
//! The arbiter keeps track of every container image the platform knows
//! about, queues each one for a Hub notification check, and re-checks the
//! whole inventory on a fixed interval.
//!
//! # Architecture
//!
//! ```text
//!   ImageRegistry ──load──┐          ┌── re-notifier (every 30m)
//!                         ▼          ▼
//!   ImageWatcher ──▶  Coordinator ──submit──▶ Dispatcher ──▶ workers ──▶ Hub
//!                      ▲   │                                   │
//!                      │   └─ ScanStateTable + CompletionTracker
//!                      └──────────── job events ◀──────────────┘
//! ```
//!
//! - [`Coordinator`] owns the [`ScanStateTable`] and the
//!   [`CompletionTracker`] and exposes the lifecycle (`start`, `watch`,
//!   `load`, `stop`) and mutation API.
//! - [`ImageRegistry`], [`ImageWatcher`], [`Dispatcher`] and [`ScanBackend`]
//!   are the seams to the platform and the Hub; the Kubernetes and Hub
//!   implementations live next to their traits.
//! - `stop` waits for every submitted job to report before shutting the
//!   workers down.
//!
//! # Usage
//!
//! ```no_run
//! use arbiter::{ArbiterConfig, Coordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ArbiterConfig::from_mounted_file("/config/config.yaml")?;
//! let client = kube::Client::try_default().await?;
//!
//! let arbiter = Coordinator::connect(config, client);
//! if arbiter.validate_backend_config().await {
//!     arbiter.start().await;
//!     arbiter.load(CancellationToken::new()).await;
//!     arbiter.watch().await;
//!     // ... until shutdown is requested
//!     arbiter.stop().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod annotator;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod job;
pub mod registry;
mod renotifier;
pub mod state;
pub mod tracker;
pub mod watcher;

pub use annotator::{Annotator, DigestAnnotator, ImageIdentity};
pub use config::{ArbiterConfig, HubConfig};
pub use coordinator::{Collaborators, Coordinator, LifecycleState};
pub use dispatcher::{Dispatcher, ScanExecutor, WorkerPool};
pub use error::{ArbiterError, Result};
pub use hub::{BackendSession, HubBackend, HubSession, ScanBackend};
pub use job::{completion_channel, CompletionSender, JobEvent, ScanJob};
pub use registry::{ImageRegistry, KubeImageRegistry, PlatformImage};
pub use state::{ImageRecord, ScanStateTable, WorkAssignment};
pub use tracker::CompletionTracker;
pub use watcher::{ImageWatcher, KubeImageWatcher};
