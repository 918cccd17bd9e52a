pub mod job;
pub mod worker;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::classifier::{classify, ErrorKind, RetryDecision};
use crate::config::CoordinatorConfig;
use crate::error::{FleetError, Result};
use crate::protocol::{
    ClaimRequest, HeartbeatRequest, OutcomeRequest, ProgressRequest, ReportedError,
    ReportedOutcome, SubmitJobRequest,
};
use job::{Job, JobError, JobStatus};
use worker::{Tier, WorkerRecord, WorkerStatus};

/// What happened to a progress/outcome report.
///
/// `Stale` means the reporter no longer holds the job's lease; the report is
/// acknowledged to the caller but changes nothing, so a worker whose lease
/// was reclaimed cannot corrupt a newer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    Applied,
    Stale,
}

/// Result of one sweeper pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub requeued: Vec<Uuid>,
    pub exhausted: Vec<Uuid>,
    pub pruned_workers: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.exhausted.is_empty() && self.pruned_workers.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    workers: HashMap<String, WorkerRecord>,
    jobs: HashMap<Uuid, Job>,
    next_seq: u64,
}

impl RegistryInner {
    fn release_worker(&mut self, worker_id: &str) {
        if let Some(rec) = self.workers.get_mut(worker_id) {
            rec.status = WorkerStatus::Idle;
            rec.current_job_id = None;
        }
    }

    /// True when some live worker's tier could serve a job reserved for
    /// `required` through the normal path.
    fn live_satisfier_exists(
        &self,
        required: Tier,
        heartbeat_timeout: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.workers
            .values()
            .any(|w| w.tier.satisfies(required) && w.is_live(heartbeat_timeout, now))
    }
}

/// The single source of truth for worker records and job lease state.
///
/// All state lives behind one lock; every public operation acquires it
/// exactly once and performs its full check-and-set inside, so concurrent
/// heartbeat/claim/report/sweep calls are serialized per mutation and the
/// exclusivity invariants (one lease per job, one job per worker) hold by
/// construction.
pub struct Registry {
    config: CoordinatorConfig,
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Accept a new job in Pending state.
    pub async fn submit(&self, req: SubmitJobRequest) -> Result<Job> {
        let mut inner = self.inner.write().await;
        if inner.jobs.len() >= self.config.max_jobs {
            return Err(FleetError::AtCapacity);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let job = Job::new(seq, req.payload, req.required_tier);
        let id = job.id;
        inner.jobs.insert(id, job.clone());

        tracing::info!(job_id = %id, required_tier = ?req.required_tier, "Job submitted");
        Ok(job)
    }

    /// Record a liveness report. Registration is idempotent: the first
    /// heartbeat creates the record, later ones refresh it.
    ///
    /// The reported status is advisory; lease bookkeeping only moves through
    /// claim, outcome and sweep. A Busy report naming the job this worker
    /// actually leases extends the lease; a Busy report naming anything else
    /// is a conflict, which stops a worker from resuming a lease it lost.
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<()> {
        if req.worker_id.trim().is_empty() {
            return Err(FleetError::InvalidRequest(
                "worker_id must not be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let rec = inner.workers.entry(req.worker_id.clone()).or_insert_with(|| {
            tracing::info!(worker_id = %req.worker_id, tier = %req.tier, provider = %req.provider, "Worker registered");
            WorkerRecord::new(
                req.worker_id.clone(),
                req.tier,
                req.provider.clone(),
                req.gpu_class.clone(),
            )
        });

        rec.tier = req.tier;
        rec.provider = req.provider.clone();
        rec.gpu_class = req.gpu_class.clone();
        rec.last_heartbeat_at = now;
        if req.system_info.is_some() {
            rec.system_info = req.system_info.clone();
        }
        if req.error_hint.is_some() {
            rec.last_error_hint = req.error_hint.clone();
        }

        if req.status == WorkerStatus::Busy {
            let reported = req.current_job_id.ok_or_else(|| {
                FleetError::InvalidRequest(
                    "busy heartbeat must carry current_job_id".to_string(),
                )
            })?;
            let held = rec.current_job_id;
            match held {
                Some(held_id) if held_id == reported => {
                    let deadline = lease_deadline(now, self.config.lease_duration);
                    if let Some(job) = inner.jobs.get_mut(&reported) {
                        job.lease_expires_at = Some(deadline);
                    }
                }
                _ => {
                    tracing::warn!(
                        worker_id = %req.worker_id,
                        reported_job = %reported,
                        held_job = ?held,
                        "Heartbeat names a job this worker does not lease"
                    );
                    return Err(FleetError::LeaseConflict(format!(
                        "worker {} does not hold a lease on job {}",
                        req.worker_id, reported
                    )));
                }
            }
        }

        Ok(())
    }

    /// Grant at most one pending job to the requesting worker.
    ///
    /// Candidates are served oldest-first among jobs whose tier reservation
    /// the worker satisfies. A reservation the worker does not satisfy opens
    /// up only when no live worker could serve it and the job has been
    /// pending for the starvation grace period. `Ok(None)` is the normal
    /// idle answer, not an error.
    pub async fn claim(&self, req: &ClaimRequest) -> Result<Option<Job>> {
        if req.worker_id.trim().is_empty() {
            return Err(FleetError::InvalidRequest(
                "worker_id must not be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write().await;
        let now = Utc::now();

        // A claim is liveness evidence: upsert like a heartbeat.
        let rec = inner.workers.entry(req.worker_id.clone()).or_insert_with(|| {
            tracing::info!(worker_id = %req.worker_id, tier = %req.tier, "Worker registered via claim");
            WorkerRecord::new(
                req.worker_id.clone(),
                req.tier,
                "unknown".to_string(),
                req.gpu_class.clone(),
            )
        });
        rec.tier = req.tier;
        rec.gpu_class = req.gpu_class.clone();
        rec.last_heartbeat_at = now;

        if rec.status == WorkerStatus::Busy || rec.current_job_id.is_some() {
            return Err(FleetError::LeaseConflict(format!(
                "worker {} already holds a lease on job {:?}",
                req.worker_id, rec.current_job_id
            )));
        }

        // Oldest-first candidate scan.
        let candidates: Vec<Uuid> = {
            let mut pending: Vec<&Job> = inner
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .collect();
            pending.sort_by_key(|j| j.seq);

            pending
                .iter()
                .filter(|j| match j.required_tier {
                    None => true,
                    Some(required) => {
                        if req.tier.satisfies(required) {
                            true
                        } else {
                            // Starvation fallback: reserved work may go to a
                            // worse tier once nobody suitable is live and the
                            // job has waited out the grace period.
                            !inner.live_satisfier_exists(
                                required,
                                self.config.heartbeat_timeout,
                                now,
                            ) && pending_at_least(j, self.config.starvation_grace, now)
                        }
                    }
                })
                .map(|j| j.id)
                .collect()
        };

        for id in candidates {
            // Check-and-set per candidate: skip any job or worker whose
            // invariant no longer holds and try the next one.
            let worker_free = inner
                .workers
                .get(&req.worker_id)
                .map(|w| w.status == WorkerStatus::Idle && w.current_job_id.is_none())
                .unwrap_or(false);
            if !worker_free {
                break;
            }
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Pending || job.lease_holder.is_some() {
                continue;
            }

            job.status = JobStatus::Leased;
            job.lease_holder = Some(req.worker_id.clone());
            job.lease_expires_at = Some(lease_deadline(now, self.config.lease_duration));
            job.attempt += 1;
            job.phase = None;
            job.progress = 0.0;
            let granted = job.clone();

            if let Some(rec) = inner.workers.get_mut(&req.worker_id) {
                rec.status = WorkerStatus::Busy;
                rec.current_job_id = Some(id);
            }

            tracing::info!(
                job_id = %id,
                worker_id = %req.worker_id,
                tier = %req.tier,
                attempt = granted.attempt,
                "Job leased"
            );
            return Ok(Some(granted));
        }

        Ok(None)
    }

    /// Apply a staged progress report from the lease holder. An accepted
    /// report is also proof of life, so it extends the lease.
    pub async fn report_progress(
        &self,
        job_id: &Uuid,
        req: &ProgressRequest,
    ) -> Result<ReportDisposition> {
        if !req.progress.is_finite() || !(0.0..=1.0).contains(&req.progress) {
            return Err(FleetError::InvalidRequest(format!(
                "progress must be within [0, 1], got {}",
                req.progress
            )));
        }

        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let Some(job) = inner.jobs.get_mut(job_id) else {
            return Err(FleetError::JobNotFound(*job_id));
        };
        if !job.is_held_by(&req.worker_id) {
            tracing::warn!(
                job_id = %job_id,
                worker_id = %req.worker_id,
                lease_holder = ?job.lease_holder,
                "Ignoring progress report from a non-holder"
            );
            return Ok(ReportDisposition::Stale);
        }

        job.phase = Some(req.phase.clone());
        job.progress = req.progress;
        for (k, v) in &req.metrics {
            job.metrics.insert(k.clone(), v.clone());
        }
        job.lease_expires_at = Some(lease_deadline(now, self.config.lease_duration));

        if let Some(rec) = inner.workers.get_mut(&req.worker_id) {
            rec.last_heartbeat_at = now;
        }

        tracing::debug!(
            job_id = %job_id,
            worker_id = %req.worker_id,
            phase = %req.phase,
            progress = req.progress,
            "Progress reported"
        );
        Ok(ReportDisposition::Applied)
    }

    /// Apply a terminal outcome report from the lease holder.
    ///
    /// Success terminalizes the job and frees the worker. Failure goes
    /// through the classifier: retryable errors requeue immediately (no
    /// wait for lease expiry) until the attempt ceiling, everything else
    /// terminalizes with the reported error surfaced to the submitter.
    pub async fn report_outcome(
        &self,
        job_id: &Uuid,
        req: &OutcomeRequest,
    ) -> Result<ReportDisposition> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let Some(job) = inner.jobs.get_mut(job_id) else {
            return Err(FleetError::JobNotFound(*job_id));
        };
        if !job.is_held_by(&req.worker_id) {
            tracing::warn!(
                job_id = %job_id,
                worker_id = %req.worker_id,
                lease_holder = ?job.lease_holder,
                "Ignoring outcome report from a non-holder"
            );
            return Ok(ReportDisposition::Stale);
        }

        for (k, v) in &req.metrics {
            job.metrics.insert(k.clone(), v.clone());
        }

        match req.outcome {
            ReportedOutcome::Succeeded => {
                job.status = JobStatus::Succeeded;
                job.artifact = req.artifact.clone();
                job.phase = Some("completed".to_string());
                job.progress = 1.0;
                job.finished_at = Some(now);
                job.lease_holder = None;
                job.lease_expires_at = None;
                tracing::info!(
                    job_id = %job_id,
                    worker_id = %req.worker_id,
                    attempt = job.attempt,
                    "Job succeeded"
                );
            }
            ReportedOutcome::Failed => {
                let err = req.error.clone().unwrap_or_else(|| ReportedError {
                    kind: ErrorKind::SystemError,
                    stage: None,
                    message: "worker reported failure without detail".to_string(),
                    retryable: true,
                });
                self.fail_attempt(job, &err, now);
            }
        }

        inner.release_worker(&req.worker_id);
        if let Some(rec) = inner.workers.get_mut(&req.worker_id) {
            rec.last_heartbeat_at = now;
        }

        Ok(ReportDisposition::Applied)
    }

    /// Requeue or terminalize a job whose attempt just failed. Caller holds
    /// the write lock.
    fn fail_attempt(&self, job: &mut Job, err: &ReportedError, now: DateTime<Utc>) {
        let decision = classify(err.kind, err.stage.as_deref(), err.retryable, job.attempt);
        match decision {
            RetryDecision::Terminal => {
                job.status = JobStatus::Failed;
                job.last_error = Some(JobError::from(err));
                job.finished_at = Some(now);
                job.lease_holder = None;
                job.lease_expires_at = None;
                tracing::warn!(
                    job_id = %job.id,
                    kind = %err.kind,
                    stage = ?err.stage,
                    attempt = job.attempt,
                    "Job failed terminally"
                );
            }
            RetryDecision::Retry { escalate } => {
                if job.attempt >= self.config.max_attempts {
                    job.status = JobStatus::Failed;
                    job.last_error = Some(JobError {
                        kind: ErrorKind::SystemError,
                        stage: err.stage.clone(),
                        message: format!(
                            "retries exhausted after {} attempts; last error: {}",
                            job.attempt, err.message
                        ),
                        retryable: false,
                    });
                    job.finished_at = Some(now);
                    job.lease_holder = None;
                    job.lease_expires_at = None;
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        "Retries exhausted, job failed terminally"
                    );
                } else {
                    job.status = JobStatus::Pending;
                    job.lease_holder = None;
                    job.lease_expires_at = None;
                    job.queued_at = now;
                    job.phase = None;
                    job.progress = 0.0;
                    job.last_error = Some(JobError::from(err));
                    if escalate && job.required_tier.is_some() {
                        tracing::info!(
                            job_id = %job.id,
                            dropped_tier = ?job.required_tier,
                            "Escalating job to the whole fleet"
                        );
                        job.required_tier = None;
                    }
                    tracing::info!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        kind = %err.kind,
                        "Job requeued for retry"
                    );
                }
            }
        }
    }

    /// Cancel a pending job. Leased jobs are refused: in-flight cancellation
    /// is best-effort only and there is no channel to interrupt a worker.
    /// Cancelling an already-terminal job is an idempotent no-op.
    pub async fn cancel(&self, job_id: &Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return Err(FleetError::JobNotFound(*job_id));
        };

        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
                tracing::info!(job_id = %job_id, "Job cancelled");
                Ok(())
            }
            JobStatus::Leased => Err(FleetError::LeaseConflict(format!(
                "job {} is leased to {:?} and cannot be cancelled",
                job_id, job.lease_holder
            ))),
            _ => Ok(()),
        }
    }

    /// Reclaim lapsed leases and prune long-silent workers.
    ///
    /// A lease lapses when its deadline passes or its holder goes stale,
    /// whichever comes first; this is the only crash-recovery mechanism.
    /// Requeueing does not touch `attempt` (the claim already counted it),
    /// but a job already at the ceiling terminalizes instead of cycling.
    pub async fn sweep(&self) -> SweepReport {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut report = SweepReport::default();

        let lapsed: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Leased)
            .filter(|j| {
                let expired = j.lease_expires_at.map(|t| t < now).unwrap_or(true);
                let holder_stale = match j.lease_holder.as_deref() {
                    Some(holder) => inner
                        .workers
                        .get(holder)
                        .map(|w| !w.is_live(self.config.heartbeat_timeout, now))
                        .unwrap_or(true),
                    None => true,
                };
                expired || holder_stale
            })
            .map(|j| j.id)
            .collect();

        for id in lapsed {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Leased {
                continue;
            }
            let holder = job.lease_holder.clone();

            if job.attempt >= self.config.max_attempts {
                job.status = JobStatus::Failed;
                job.last_error = Some(JobError {
                    kind: ErrorKind::SystemError,
                    stage: None,
                    message: format!("retries exhausted after {} attempts", job.attempt),
                    retryable: false,
                });
                job.finished_at = Some(now);
                job.lease_holder = None;
                job.lease_expires_at = None;
                tracing::warn!(
                    job_id = %id,
                    attempt = job.attempt,
                    holder = ?holder,
                    "Lease lapsed with retries exhausted, job failed terminally"
                );
                report.exhausted.push(id);
            } else {
                job.status = JobStatus::Pending;
                job.lease_holder = None;
                job.lease_expires_at = None;
                job.queued_at = now;
                job.phase = None;
                job.progress = 0.0;
                job.last_error = Some(JobError {
                    kind: ErrorKind::CoordinationTimeout,
                    stage: None,
                    message: "lease expired without an outcome report".to_string(),
                    retryable: true,
                });
                tracing::warn!(
                    job_id = %id,
                    attempt = job.attempt,
                    holder = ?holder,
                    "Lease lapsed, job requeued"
                );
                report.requeued.push(id);
            }

            if let Some(holder) = holder {
                inner.release_worker(&holder);
            }
        }

        // A worker is only dropped once it holds nothing; reclaiming above
        // already cleared the lease of any crashed holder.
        let prune: Vec<String> = inner
            .workers
            .values()
            .filter(|w| {
                w.current_job_id.is_none() && !w.is_live(self.config.worker_prune_after, now)
            })
            .map(|w| w.id.clone())
            .collect();
        for id in prune {
            inner.workers.remove(&id);
            tracing::info!(worker_id = %id, "Pruned silent worker");
            report.pruned_workers.push(id);
        }

        report
    }

    pub async fn job(&self, job_id: &Uuid) -> Option<Job> {
        self.inner.read().await.jobs.get(job_id).cloned()
    }

    /// All jobs, oldest first, optionally filtered by status.
    pub async fn jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    pub async fn worker(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.inner.read().await.workers.get(worker_id).cloned()
    }

    pub async fn workers(&self) -> Vec<WorkerRecord> {
        let inner = self.inner.read().await;
        let mut workers: Vec<WorkerRecord> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    match chrono::Duration::from_std(lease) {
        Ok(d) => now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC),
        Err(_) => DateTime::<Utc>::MAX_UTC,
    }
}

fn pending_at_least(job: &Job, grace: Duration, now: DateTime<Utc>) -> bool {
    match (now - job.queued_at).to_std() {
        Ok(waited) => waited >= grace,
        Err(_) => false,
    }
}
