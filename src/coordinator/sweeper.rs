use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::Registry;

/// Background task that reclaims lapsed leases on a fixed interval.
///
/// This is the only path that recovers jobs from crashed or partitioned
/// workers, so the interval must stay well under the heartbeat timeout.
pub async fn run_sweeper(
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Lease sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let report = registry.sweep().await;
                if !report.is_empty() {
                    tracing::info!(
                        requeued = report.requeued.len(),
                        exhausted = report.exhausted.len(),
                        pruned_workers = report.pruned_workers.len(),
                        "Sweep reclaimed state"
                    );
                }
            }
        }
    }
}
