use serde::Deserialize;
use serde_json::{Map, Value};

use crate::classifier::ErrorKind;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::protocol::{JobLease, ReportedError};
use crate::registry::job::Artifact;

/// Phase names the agent mirrors to the coordinator around a run.
pub const PHASE_INFERRING: &str = "inferring";
pub const PHASE_UPLOADING: &str = "uploading";

/// Success payload from the local runner process.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSuccess {
    pub artifact: Artifact,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

/// Failure payload from the local runner process.
#[derive(Debug, Clone, Deserialize)]
struct RunnerFailure {
    error_type: String,
    #[serde(default)]
    stage: Option<String>,
    message: String,
    #[serde(default)]
    retryable: Option<bool>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Success(RunSuccess),
    Failure(ReportedError),
}

/// Drives the opaque execution step: one HTTP call to the co-located
/// runner, which owns the actual inference and artifact upload.
pub struct JobRunner {
    http: reqwest::Client,
    generate_url: String,
}

impl JobRunner {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        // A run can take many minutes, so only the connect phase is bounded.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            generate_url: format!("{}/generate", config.runner_url.trim_end_matches('/')),
        })
    }

    /// Never fails at the transport level from the caller's point of view:
    /// anything that keeps the run from finishing becomes a reportable error.
    pub async fn run(&self, lease: &JobLease) -> RunOutcome {
        let resp = match self
            .http
            .post(&self.generate_url)
            .json(&lease.payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                return RunOutcome::Failure(ReportedError {
                    kind: ErrorKind::SystemError,
                    stage: Some("dispatch".to_string()),
                    message: format!("runner unreachable: {err}"),
                    retryable: true,
                })
            }
        };

        let status = resp.status();
        if status.is_success() {
            match resp.json::<RunSuccess>().await {
                Ok(success) => RunOutcome::Success(success),
                Err(err) => RunOutcome::Failure(ReportedError {
                    kind: ErrorKind::SystemError,
                    stage: Some("decode".to_string()),
                    message: format!("runner returned an undecodable success body: {err}"),
                    retryable: true,
                }),
            }
        } else {
            match resp.json::<RunnerFailure>().await {
                Ok(failure) => RunOutcome::Failure(map_failure(failure)),
                Err(_) => RunOutcome::Failure(ReportedError {
                    kind: ErrorKind::SystemError,
                    stage: None,
                    message: format!("runner returned status {status}"),
                    retryable: true,
                }),
            }
        }
    }
}

fn map_failure(failure: RunnerFailure) -> ReportedError {
    let kind = classify_error_type(&failure.error_type, failure.stage.as_deref());
    // When the runner doesn't say, only environment failures default to retryable.
    let retryable = failure
        .retryable
        .unwrap_or(kind == ErrorKind::SystemError);
    ReportedError {
        kind,
        stage: failure.stage,
        message: failure.message,
        retryable,
    }
}

/// Media and validation failures mean the payload itself is bad and no
/// other worker will fare better. Everything else is an environment
/// failure another attempt may dodge.
fn classify_error_type(error_type: &str, stage: Option<&str>) -> ErrorKind {
    let t = error_type.to_ascii_lowercase();
    if t.contains("media") || t.contains("input") || t.contains("validation") {
        return ErrorKind::InputError;
    }
    if let Some(stage) = stage {
        let s = stage.to_ascii_lowercase();
        if s == "download" || s == "validation" {
            return ErrorKind::InputError;
        }
    }
    ErrorKind::SystemError
}
