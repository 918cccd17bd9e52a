use std::net::SocketAddr;
use std::time::Duration;

use crate::registry::worker::Tier;

/// Configuration for the coordinator process: bind address, auth secret,
/// and the timing knobs that drive lease arbitration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
    /// Shared secret expected in the `x-internal-api-key` header.
    /// An empty key disables auth (logged loudly at startup).
    pub api_key: String,
    /// A worker is live iff its last heartbeat is younger than this.
    pub heartbeat_timeout: Duration,
    /// How long a claim holds a job before the sweeper may reclaim it.
    /// Matching busy heartbeats and progress reports extend the lease.
    pub lease_duration: Duration,
    /// Sweeper wakeup interval. Must be shorter than `heartbeat_timeout`.
    pub sweep_interval: Duration,
    /// How long a tier-reserved job may sit pending before the starvation
    /// fallback opens it to the whole fleet.
    pub starvation_grace: Duration,
    /// Silent workers holding no lease are dropped after this long.
    pub worker_prune_after: Duration,
    /// Claim ceiling: once `attempt` reaches this, the next requeue decision
    /// terminalizes the job instead.
    pub max_attempts: u32,
    /// Upper bound on jobs held in the registry.
    pub max_jobs: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            bind_addr: "0.0.0.0:7420"
                .parse()
                .expect("default bind address is valid"),
            api_key: String::new(),
            heartbeat_timeout: Duration::from_secs(30),
            lease_duration: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(10),
            starvation_grace: Duration::from_secs(60),
            worker_prune_after: Duration::from_secs(300),
            max_attempts: 3,
            max_jobs: 10_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(bind_addr: SocketAddr, api_key: String) -> Self {
        Self {
            bind_addr,
            api_key,
            ..Default::default()
        }
    }
}

/// Configuration for a worker agent process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub coordinator_url: String,
    pub api_key: String,
    pub worker_id: String,
    pub tier: Tier,
    pub provider: String,
    pub gpu_class: String,
    /// Local endpoint that performs the actual job execution.
    pub runner_url: String,
    pub heartbeat_interval: Duration,
    /// How long to sleep between claim attempts when the fleet is idle.
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let (worker_id, provider) = detect_worker_identity();
        Self {
            coordinator_url: "http://127.0.0.1:7420".to_string(),
            api_key: String::new(),
            worker_id,
            tier: Tier::Buffer,
            provider,
            gpu_class: "unknown".to_string(),
            runner_url: "http://127.0.0.1:8000".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Derive this machine's worker id and provider tag from the environment
/// variables the cloud providers inject into their containers. Falls back
/// to a generated id tagged as a local machine.
pub fn detect_worker_identity() -> (String, String) {
    let candidates = [
        ("SALAD_MACHINE_ID", "salad"),
        ("VAST_CONTAINERLABEL", "vast"),
        ("OCTASPACE_NODE_ID", "octaspace"),
        ("RUNPOD_POD_ID", "runpod"),
    ];

    for (var, provider) in candidates {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return (value, provider.to_string());
            }
        }
    }

    (
        format!("local-{}", uuid::Uuid::new_v4()),
        "local".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:7420");
        assert!(cfg.api_key.is_empty());
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(cfg.lease_duration, Duration::from_secs(90));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(10));
        assert_eq!(cfg.starvation_grace, Duration::from_secs(60));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.max_jobs, 10_000);
    }

    #[test]
    fn sweep_interval_shorter_than_heartbeat_timeout() {
        let cfg = CoordinatorConfig::default();
        assert!(cfg.sweep_interval < cfg.heartbeat_timeout);
    }

    #[test]
    fn coordinator_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = CoordinatorConfig::new(addr, "secret".to_string());
        assert_eq!(cfg.bind_addr, addr);
        assert_eq!(cfg.api_key, "secret");
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn agent_config_default() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.coordinator_url, "http://127.0.0.1:7420");
        assert_eq!(cfg.runner_url, "http://127.0.0.1:8000");
        assert_eq!(cfg.tier, Tier::Buffer);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert!(!cfg.worker_id.is_empty());
    }

    #[test]
    fn detected_identity_is_never_empty() {
        let (id, provider) = detect_worker_identity();
        assert!(!id.is_empty());
        assert!(!provider.is_empty());
    }
}
