use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::classifier::ErrorKind;
use crate::registry::worker::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Leased,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are sinks: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Leased => write!(f, "leased"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Input descriptor handed to the execution step. The coordinator never
/// looks inside; it only stores and forwards it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    pub video_url: String,
    pub audio_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Where a successful run left its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Structured failure attached to a job, either reported by the worker
/// agent or synthesized by the sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub required_tier: Option<Tier>,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Claim counter. Incremented when a lease is granted, never on requeue.
    pub attempt: u32,
    /// Submission order; the claim arbiter serves lower sequences first.
    pub seq: u64,
    pub submitted_at: DateTime<Utc>,
    /// When the job last entered Pending. The starvation grace period is
    /// measured from here.
    pub queued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: Option<String>,
    pub progress: f64,
    pub metrics: Map<String, Value>,
    pub last_error: Option<JobError>,
    pub artifact: Option<Artifact>,
}

impl Job {
    pub fn new(seq: u64, payload: JobPayload, required_tier: Option<Tier>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Pending,
            required_tier,
            lease_holder: None,
            lease_expires_at: None,
            attempt: 0,
            seq,
            submitted_at: now,
            queued_at: now,
            finished_at: None,
            phase: None,
            progress: 0.0,
            metrics: Map::new(),
            last_error: None,
            artifact: None,
        }
    }

    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.lease_holder.as_deref() == Some(worker_id)
    }
}
