use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::client::CoordinatorClient;
use crate::config::AgentConfig;
use crate::error::FleetError;
use crate::protocol::HeartbeatRequest;
use crate::registry::worker::{SystemInfo, WorkerStatus};

/// State shared between the claim loop and the heartbeat task.
#[derive(Debug, Default)]
pub struct AgentShared {
    /// Job this agent believes it holds. The heartbeat task echoes it so
    /// the coordinator can extend the lease while the run is in flight.
    pub current_job: Option<Uuid>,
    /// Last execution failure, surfaced on the worker record for operators.
    pub last_error_hint: Option<String>,
}

pub fn heartbeat_request(config: &AgentConfig, shared: &AgentShared) -> HeartbeatRequest {
    let status = if shared.current_job.is_some() {
        WorkerStatus::Busy
    } else {
        WorkerStatus::Idle
    };
    HeartbeatRequest {
        worker_id: config.worker_id.clone(),
        status,
        tier: config.tier,
        provider: config.provider.clone(),
        gpu_class: config.gpu_class.clone(),
        current_job_id: shared.current_job,
        system_info: None,
        error_hint: shared.last_error_hint.clone(),
    }
}

/// Best-effort host snapshot. Providers differ wildly in what they expose,
/// so every field stays optional.
pub fn local_system_info() -> SystemInfo {
    SystemInfo {
        cpu_cores_logical: std::thread::available_parallelism()
            .ok()
            .map(|n| n.get() as u32),
        ..SystemInfo::default()
    }
}

/// Periodic liveness reporter. Runs until the shutdown token fires.
pub async fn run_heartbeat(
    client: Arc<CoordinatorClient>,
    config: AgentConfig,
    shared: Arc<Mutex<AgentShared>>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    let system_info = local_system_info();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Heartbeat task shutting down");
                break;
            }
            _ = ticker.tick() => {
                let mut req = {
                    let state = shared.lock().await;
                    heartbeat_request(&config, &state)
                };
                req.system_info = Some(system_info.clone());

                match client.heartbeat(&req).await {
                    Ok(()) => {}
                    Err(FleetError::LeaseConflict(msg)) => {
                        // The coordinator disagrees about what we hold. Drop
                        // the local claim; the sweeper settles the registry side.
                        tracing::warn!(error = %msg, "Heartbeat rejected, dropping local job state");
                        shared.lock().await.current_job = None;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Heartbeat delivery failed");
                    }
                }
            }
        }
    }
}
