//! Wire types shared by the coordinator's HTTP API and the worker agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::classifier::ErrorKind;
use crate::registry::job::{Artifact, Job, JobError, JobPayload, JobStatus};
use crate::registry::worker::{SystemInfo, Tier, WorkerRecord, WorkerStatus};

pub const API_KEY_HEADER: &str = "x-internal-api-key";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub tier: Tier,
    pub provider: String,
    pub gpu_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub tier: Tier,
    pub gpu_class: String,
}

/// The slice of a job a worker needs to execute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLease {
    pub id: Uuid,
    pub payload: JobPayload,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<Tier>,
    pub lease_expires_at: DateTime<Utc>,
}

impl From<&Job> for JobLease {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            payload: job.payload.clone(),
            attempt: job.attempt,
            required_tier: job.required_tier,
            lease_expires_at: job.lease_expires_at.unwrap_or_else(Utc::now),
        }
    }
}

/// `job: null` is the expected answer when nothing is eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<JobLease>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub worker_id: String,
    pub phase: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedOutcome {
    Succeeded,
    Failed,
}

/// Failure description as the worker agent reports it. The agent performs
/// the input-vs-system classification; the coordinator trusts the kind tag
/// but applies the retry ceiling itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
    #[serde(default = "default_true")]
    pub retryable: bool,
}

impl From<&ReportedError> for JobError {
    fn from(err: &ReportedError) -> Self {
        Self {
            kind: err.kind,
            stage: err.stage.clone(),
            message: err.message.clone(),
            retryable: err.retryable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRequest {
    pub worker_id: String,
    pub outcome: ReportedOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub payload: JobPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<Tier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub id: Uuid,
}

/// Submitter-facing view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub status: JobStatus,
    pub payload: JobPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            payload: job.payload.clone(),
            required_tier: job.required_tier,
            lease_holder: job.lease_holder.clone(),
            lease_expires_at: job.lease_expires_at,
            attempt: job.attempt,
            phase: job.phase.clone(),
            progress: job.progress,
            metrics: job.metrics.clone(),
            error: job.last_error.clone(),
            artifact: job.artifact.clone(),
            submitted_at: job.submitted_at,
            finished_at: job.finished_at,
        }
    }
}

/// Fleet view of a worker with the liveness verdict derived at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: String,
    pub tier: Tier,
    pub provider: String,
    pub gpu_class: String,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<Uuid>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
}

impl WorkerView {
    pub fn from_record(record: &WorkerRecord, live: bool) -> Self {
        Self {
            id: record.id.clone(),
            tier: record.tier,
            provider: record.provider.clone(),
            gpu_class: record.gpu_class.clone(),
            status: record.status,
            current_job_id: record.current_job_id,
            last_heartbeat_at: record.last_heartbeat_at,
            live,
            system_info: record.system_info.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
