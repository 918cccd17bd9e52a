use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FleetError;

/// Worker priority class, ordered by cost: cheaper tiers are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Overflow,
    LastResort,
    Buffer,
}

impl Tier {
    /// Position in the service order; lower ranks are tried first.
    pub fn rank(self) -> u8 {
        match self {
            Tier::Primary => 0,
            Tier::Overflow => 1,
            Tier::LastResort => 2,
            Tier::Buffer => 3,
        }
    }

    /// Whether a worker of this tier may take a job reserved for `required`.
    pub fn satisfies(self, required: Tier) -> bool {
        self.rank() <= required.rank()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Overflow => write!(f, "overflow"),
            Tier::LastResort => write!(f, "last_resort"),
            Tier::Buffer => write!(f, "buffer"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Tier::Primary),
            "overflow" => Ok(Tier::Overflow),
            "last_resort" | "last-resort" => Ok(Tier::LastResort),
            "buffer" => Ok(Tier::Buffer),
            other => Err(FleetError::InvalidTier(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
        }
    }
}

/// Machine snapshot a worker may attach to its heartbeat. Informational
/// only; never consulted by the claim arbiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cpu_cores_physical: Option<u32>,
    pub cpu_cores_logical: Option<u32>,
    pub ram_total_gb: Option<f64>,
    pub ram_available_gb: Option<f64>,
    pub disk_total_gb: Option<f64>,
    pub disk_free_gb: Option<f64>,
    pub download_speed_mbps: Option<f64>,
}

/// Registry row for one worker. Liveness is derived from
/// `last_heartbeat_at`, never stored, so it cannot go stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub tier: Tier,
    pub provider: String,
    pub gpu_class: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub system_info: Option<SystemInfo>,
    pub last_error_hint: Option<String>,
}

impl WorkerRecord {
    pub fn new(id: String, tier: Tier, provider: String, gpu_class: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            tier,
            provider,
            gpu_class,
            status: WorkerStatus::Idle,
            current_job_id: None,
            last_heartbeat_at: now,
            first_seen_at: now,
            system_info: None,
            last_error_hint: None,
        }
    }

    pub fn is_live(&self, heartbeat_timeout: Duration, now: DateTime<Utc>) -> bool {
        match (now - self.last_heartbeat_at).to_std() {
            Ok(elapsed) => elapsed < heartbeat_timeout,
            // Heartbeat timestamp ahead of `now`: count as live.
            Err(_) => true,
        }
    }
}
