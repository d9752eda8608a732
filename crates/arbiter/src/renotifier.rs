//! Periodic notification sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::coordinator::Coordinator;

/// Spawn the re-notifier: every `period` (first tick one full period from
/// now) queue every known image for a notification check, until `shutdown`
/// is cancelled. A sweep in progress runs to completion.
pub(crate) fn spawn(
    coordinator: Coordinator,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let span = tracing::info_span!("renotifier", period_secs = period.as_secs());

    tokio::spawn(
        async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        info!(at = %chrono::Utc::now(), "Processing notification status");
                        let queued = coordinator.queue_images_for_notification().await;
                        debug!(queued, "Notification sweep finished");
                    }
                }
            }

            debug!("Re-notifier stopped");
        }
        .instrument(span),
    )
}
