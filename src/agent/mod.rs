pub mod client;
pub mod heartbeat;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::{FleetError, Result};
use crate::protocol::{
    ClaimRequest, JobLease, OutcomeRequest, ProgressRequest, ReportedOutcome,
};
use client::CoordinatorClient;
use heartbeat::AgentShared;
use runner::{JobRunner, RunOutcome, PHASE_INFERRING, PHASE_UPLOADING};

/// How many times an outcome report is retried before the agent gives up
/// and lets the lease lapse.
const REPORT_RETRIES: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Runs the worker agent: a heartbeat task plus a sequential claim loop.
/// One job at a time; the loop only claims again once the previous outcome
/// has been reported or abandoned.
pub async fn run_agent(config: AgentConfig, shutdown: CancellationToken) -> Result<()> {
    let client = Arc::new(CoordinatorClient::new(&config)?);
    let runner = JobRunner::new(&config)?;
    let shared = Arc::new(Mutex::new(AgentShared::default()));

    tracing::info!(
        worker_id = %config.worker_id,
        tier = %config.tier,
        provider = %config.provider,
        coordinator = %config.coordinator_url,
        "Starting worker agent"
    );

    let heartbeat_handle = tokio::spawn(heartbeat::run_heartbeat(
        client.clone(),
        config.clone(),
        shared.clone(),
        shutdown.clone(),
    ));

    let claim_req = ClaimRequest {
        worker_id: config.worker_id.clone(),
        tier: config.tier,
        gpu_class: config.gpu_class.clone(),
    };
    let mut claim_failures: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let lease = match client.claim(&claim_req).await {
            Ok(lease) => {
                claim_failures = 0;
                lease
            }
            Err(FleetError::LeaseConflict(msg)) => {
                // The registry still has a lease pinned to us, likely from a
                // previous incarnation. The sweeper reclaims it once it
                // expires, so just poll again later.
                tracing::warn!(error = %msg, "Claim refused, waiting for the stale lease to lapse");
                claim_failures = 0;
                None
            }
            Err(err) => {
                claim_failures += 1;
                let delay = backoff_delay(claim_failures);
                tracing::warn!(
                    error = %err,
                    failures = claim_failures,
                    delay_secs = delay.as_secs(),
                    "Claim request failed, backing off"
                );
                if sleep_or_shutdown(delay, &shutdown).await {
                    break;
                }
                continue;
            }
        };

        match lease {
            Some(lease) => {
                execute_and_report(&config, &client, &runner, &shared, lease).await;
                // Claim again immediately while the queue may still have work.
            }
            None => {
                if sleep_or_shutdown(config.poll_interval, &shutdown).await {
                    break;
                }
            }
        }
    }

    let _ = heartbeat_handle.await;
    tracing::info!("Worker agent stopped");
    Ok(())
}

async fn execute_and_report(
    config: &AgentConfig,
    client: &CoordinatorClient,
    runner: &JobRunner,
    shared: &Arc<Mutex<AgentShared>>,
    lease: JobLease,
) {
    let job_id = lease.id;
    tracing::info!(job_id = %job_id, attempt = lease.attempt, "Executing leased job");
    shared.lock().await.current_job = Some(job_id);

    report_progress_best_effort(config, client, &lease, PHASE_INFERRING, 0.1).await;

    let outcome_req = match runner.run(&lease).await {
        RunOutcome::Success(success) => {
            report_progress_best_effort(config, client, &lease, PHASE_UPLOADING, 0.95).await;
            tracing::info!(
                job_id = %job_id,
                bucket = %success.artifact.bucket,
                key = %success.artifact.key,
                "Job execution succeeded"
            );
            OutcomeRequest {
                worker_id: config.worker_id.clone(),
                outcome: ReportedOutcome::Succeeded,
                error: None,
                artifact: Some(success.artifact),
                metrics: success.metrics,
            }
        }
        RunOutcome::Failure(err) => {
            tracing::warn!(
                job_id = %job_id,
                kind = %err.kind,
                stage = ?err.stage,
                message = %err.message,
                "Job execution failed"
            );
            shared.lock().await.last_error_hint = Some(err.message.clone());
            OutcomeRequest {
                worker_id: config.worker_id.clone(),
                outcome: ReportedOutcome::Failed,
                error: Some(err),
                artifact: None,
                metrics: Map::new(),
            }
        }
    };

    // The outcome has to land or the attempt is wasted. Retry a few times;
    // past that the lease lapses and the sweeper requeues the job.
    let mut delivered = false;
    for attempt in 1..=REPORT_RETRIES {
        match client.report_outcome(&job_id, &outcome_req).await {
            Ok(()) => {
                delivered = true;
                break;
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, attempt, error = %err, "Outcome report failed");
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
    }
    if !delivered {
        tracing::error!(job_id = %job_id, "Giving up on outcome report, the lease will lapse");
    }

    shared.lock().await.current_job = None;
}

async fn report_progress_best_effort(
    config: &AgentConfig,
    client: &CoordinatorClient,
    lease: &JobLease,
    phase: &str,
    progress: f64,
) {
    let req = ProgressRequest {
        worker_id: config.worker_id.clone(),
        phase: phase.to_string(),
        progress,
        metrics: Map::new(),
    };
    if let Err(err) = client.report_progress(&lease.id, &req).await {
        tracing::warn!(job_id = %lease.id, phase, error = %err, "Progress report failed");
    }
}

fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.min(6).saturating_sub(1);
    let delay = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(exp));
    delay.min(BACKOFF_CAP)
}

async fn sleep_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
