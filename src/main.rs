use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gpu_fleet::agent::client::CoordinatorClient;
use gpu_fleet::agent::run_agent;
use gpu_fleet::config::{detect_worker_identity, AgentConfig, CoordinatorConfig};
use gpu_fleet::coordinator::run_coordinator;
use gpu_fleet::protocol::{SubmitJobRequest, SubmitJobResponse};
use gpu_fleet::registry::job::JobPayload;
use gpu_fleet::registry::worker::Tier;
use gpu_fleet::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "gpu-fleet")]
#[command(version)]
#[command(about = "Job leasing and liveness coordination for an elastic GPU worker fleet")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the fleet coordinator
    Coordinator(CoordinatorArgs),

    /// Start a worker agent on this machine
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Fleet management commands
    Fleet {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: FleetCommands,
    },
}

// =============================================================================
// Coordinator Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Address to bind the HTTP API on
    #[arg(long, env = "FLEET_BIND_ADDR", default_value = "0.0.0.0:7420")]
    bind_addr: String,

    /// Shared API key workers must present (empty disables auth)
    #[arg(long, env = "FLEET_API_KEY", default_value = "")]
    api_key: String,

    /// Seconds a lease lives without being extended
    #[arg(long, env = "FLEET_LEASE_DURATION_SEC", default_value = "90")]
    lease_duration_sec: u64,

    /// Seconds of heartbeat silence before a worker counts as stale
    #[arg(long, env = "FLEET_HEARTBEAT_TIMEOUT_SEC", default_value = "30")]
    heartbeat_timeout_sec: u64,

    /// Seconds between lease sweeps
    #[arg(long, env = "FLEET_SWEEP_INTERVAL_SEC", default_value = "10")]
    sweep_interval_sec: u64,

    /// Seconds a tier-reserved job may wait before any live worker can take it
    #[arg(long, env = "FLEET_STARVATION_GRACE_SEC", default_value = "60")]
    starvation_grace_sec: u64,

    /// Seconds of silence before an idle worker record is dropped
    #[arg(long, env = "FLEET_WORKER_PRUNE_AFTER_SEC", default_value = "300")]
    worker_prune_after_sec: u64,

    /// Executions a job gets before it fails terminally
    #[arg(long, env = "FLEET_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// Upper bound on jobs held in the registry
    #[arg(long, env = "FLEET_MAX_JOBS", default_value = "10000")]
    max_jobs: usize,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Coordinator base URL
    #[arg(
        long,
        env = "FLEET_COORDINATOR_URL",
        default_value = "http://127.0.0.1:7420"
    )]
    coordinator_url: String,

    /// Shared API key (must match the coordinator's)
    #[arg(long, env = "FLEET_API_KEY", default_value = "")]
    api_key: String,

    /// Stable worker identity (defaults to the provider-injected id)
    #[arg(long, env = "FLEET_WORKER_ID")]
    worker_id: Option<String>,

    /// Priority tier: primary, overflow, last_resort or buffer
    #[arg(long, env = "FLEET_TIER", default_value = "buffer")]
    tier: String,

    /// Provider label (defaults to the detected environment)
    #[arg(long, env = "FLEET_PROVIDER")]
    provider: Option<String>,

    /// GPU class advertised on claims, e.g. "rtx4090"
    #[arg(long, env = "FLEET_GPU_CLASS", default_value = "unknown")]
    gpu_class: String,

    /// Base URL of the co-located runner process
    #[arg(long, env = "FLEET_RUNNER_URL", default_value = "http://127.0.0.1:8000")]
    runner_url: String,

    /// Seconds between heartbeats
    #[arg(long, env = "FLEET_HEARTBEAT_INTERVAL_SEC", default_value = "5")]
    heartbeat_interval_sec: u64,

    /// Seconds to sleep between claim attempts when the queue is empty
    #[arg(long, env = "FLEET_POLL_INTERVAL_SEC", default_value = "10")]
    poll_interval_sec: u64,
}

// =============================================================================
// Client Arguments (shared by job and fleet commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator base URL
    #[arg(
        long,
        short = 'a',
        env = "FLEET_COORDINATOR_URL",
        default_value = "http://127.0.0.1:7420"
    )]
    addr: String,

    /// Shared API key
    #[arg(long, env = "FLEET_API_KEY", default_value = "")]
    api_key: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a new generation job
    Submit {
        /// Source video URL
        video_url: String,

        /// Driving audio URL
        audio_url: String,

        /// Output aspect ratio, e.g. "9:16"
        #[arg(long)]
        aspect_ratio: Option<String>,

        /// Output resolution, e.g. "720p"
        #[arg(long)]
        resolution: Option<String>,

        /// Reserve the job for this tier or better
        #[arg(long)]
        required_tier: Option<String>,
    },
    /// Get status of a specific job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// List jobs
    List {
        /// Only show jobs with this status (pending, leased, succeeded, failed, cancelled)
        #[arg(long)]
        status: Option<String>,
    },
    /// Cancel a pending job
    Cancel {
        /// The job ID (UUID)
        job_id: String,
    },
}

// =============================================================================
// Fleet Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum FleetCommands {
    /// Show every registered worker and its liveness
    Status,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn create_client(args: &ClientArgs) -> Result<CoordinatorClient, Box<dyn std::error::Error>> {
    Ok(CoordinatorClient::with_base(
        &args.addr,
        &args.api_key,
        Duration::from_secs(10),
        Duration::from_secs(30),
    )?)
}

// =============================================================================
// Coordinator Implementation
// =============================================================================

async fn run_coordinator_cmd(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let bind_addr: SocketAddr = args.bind_addr.parse()?;
    let config = CoordinatorConfig {
        bind_addr,
        api_key: args.api_key,
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout_sec),
        lease_duration: Duration::from_secs(args.lease_duration_sec),
        sweep_interval: Duration::from_secs(args.sweep_interval_sec),
        starvation_grace: Duration::from_secs(args.starvation_grace_sec),
        worker_prune_after: Duration::from_secs(args.worker_prune_after_sec),
        max_attempts: args.max_attempts,
        max_jobs: args.max_jobs,
    };

    let shutdown = install_shutdown_handler();
    run_coordinator(config, shutdown).await?;

    Ok(())
}

// =============================================================================
// Worker Implementation
// =============================================================================

async fn run_worker_cmd(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let (detected_id, detected_provider) = detect_worker_identity();
    let tier: Tier = args.tier.parse()?;

    let config = AgentConfig {
        coordinator_url: args.coordinator_url,
        api_key: args.api_key,
        worker_id: args.worker_id.unwrap_or(detected_id),
        tier,
        provider: args.provider.unwrap_or(detected_provider),
        gpu_class: args.gpu_class,
        runner_url: args.runner_url,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval_sec),
        poll_interval: Duration::from_secs(args.poll_interval_sec),
        ..AgentConfig::default()
    };

    let shutdown = install_shutdown_handler();
    run_agent(config, shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &CoordinatorClient,
    req: SubmitJobRequest,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = client.submit_job(&req).await?;

    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&SubmitJobResponse { id })?
            );
        }
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", id);
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &CoordinatorClient,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = Uuid::parse_str(&job_id)?;
    let job = client.job(&id).await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        OutputFormat::Table => {
            println!("Job ID:     {}", job.id);
            println!("Status:     {}", job.status);
            println!("Attempt:    {}", job.attempt);
            if let Some(tier) = job.required_tier {
                println!("Tier:       {}", tier);
            }
            if let Some(worker) = &job.lease_holder {
                println!("Worker:     {}", worker);
            }
            if let Some(phase) = &job.phase {
                println!("Phase:      {}", phase);
            }
            println!("Progress:   {:.0}%", job.progress * 100.0);
            if let Some(err) = &job.error {
                println!("Last error: [{}] {}", err.kind, err.message);
            }
            if let Some(artifact) = &job.artifact {
                match &artifact.url {
                    Some(url) => println!("Artifact:   {}", url),
                    None => println!("Artifact:   s3://{}/{}", artifact.bucket, artifact.key),
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    client: &CoordinatorClient,
    status: Option<String>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = client.jobs(status.as_deref()).await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<38} {:<11} {:<12} {:<8} {:<10} WORKER",
                    "JOB ID", "STATUS", "TIER", "ATTEMPT", "PHASE"
                );
                println!("{}", "-".repeat(96));

                for job in &jobs {
                    let tier = job
                        .required_tier
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let phase = job.phase.clone().unwrap_or_else(|| "-".to_string());
                    let worker = job.lease_holder.clone().unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<38} {:<11} {:<12} {:<8} {:<10} {}",
                        job.id.to_string(),
                        job.status.to_string(),
                        tier,
                        job.attempt,
                        phase,
                        worker
                    );
                }
                println!();
                println!("Showing {} jobs", jobs.len());
            }
        }
    }
    Ok(())
}

async fn handle_job_cancel(
    client: &CoordinatorClient,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = Uuid::parse_str(&job_id)?;
    client.cancel_job(&id).await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "cancelled": id }));
        }
        OutputFormat::Table => {
            println!("Job {} cancelled.", id);
        }
    }
    Ok(())
}

async fn handle_fleet_status(
    client: &CoordinatorClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers = client.workers().await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&workers)?);
        }
        OutputFormat::Table => {
            if workers.is_empty() {
                println!("No workers registered.");
            } else {
                println!(
                    "{:<28} {:<12} {:<11} {:<12} {:<6} {:<6} JOB",
                    "WORKER ID", "TIER", "PROVIDER", "GPU", "STATE", "LIVE"
                );
                println!("{}", "-".repeat(92));

                for w in &workers {
                    let live = if w.live { "yes" } else { "no" };
                    let job = w
                        .current_job_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<28} {:<12} {:<11} {:<12} {:<6} {:<6} {}",
                        w.id,
                        w.tier.to_string(),
                        w.provider,
                        w.gpu_class,
                        w.status.to_string(),
                        live,
                        job
                    );
                }
                println!();
                let live_count = workers.iter().filter(|w| w.live).count();
                println!("{} workers, {} live", workers.len(), live_count);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Coordinator(coordinator_args) => {
            run_coordinator_cmd(coordinator_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker_cmd(worker_args).await?;
        }
        Commands::Job { client, command } => {
            let api = create_client(&client)?;

            match command {
                JobCommands::Submit {
                    video_url,
                    audio_url,
                    aspect_ratio,
                    resolution,
                    required_tier,
                } => {
                    let required_tier = match required_tier {
                        Some(t) => Some(t.parse::<Tier>()?),
                        None => None,
                    };
                    let req = SubmitJobRequest {
                        payload: JobPayload {
                            video_url,
                            audio_url,
                            aspect_ratio,
                            resolution,
                            params: serde_json::Map::new(),
                            metadata: serde_json::Map::new(),
                        },
                        required_tier,
                    };
                    handle_job_submit(&api, req, &client.output).await?;
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&api, job_id, &client.output).await?;
                }
                JobCommands::List { status } => {
                    handle_job_list(&api, status, &client.output).await?;
                }
                JobCommands::Cancel { job_id } => {
                    handle_job_cancel(&api, job_id, &client.output).await?;
                }
            }
        }
        Commands::Fleet { client, command } => {
            let api = create_client(&client)?;

            match command {
                FleetCommands::Status => {
                    handle_fleet_status(&api, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
