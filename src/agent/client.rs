use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{FleetError, Result};
use crate::protocol::{
    AckResponse, ClaimRequest, ClaimResponse, ErrorResponse, HeartbeatRequest, JobLease, JobView,
    OutcomeRequest, ProgressRequest, SubmitJobRequest, SubmitJobResponse, WorkerView,
    API_KEY_HEADER,
};

/// Typed HTTP client for the coordinator's protocol surface. Used by the
/// worker agent and by the CLI's submission commands.
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CoordinatorClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Self::with_base(
            &config.coordinator_url,
            &config.api_key,
            config.connect_timeout,
            config.request_timeout,
        )
    }

    pub fn with_base(
        base_url: &str,
        api_key: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let message = match resp.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => format!("coordinator returned status {}", status),
        };
        if status == reqwest::StatusCode::CONFLICT {
            return Err(FleetError::LeaseConflict(message));
        }
        Err(FleetError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<()> {
        let _: AckResponse = self.post_json("/v1/workers/heartbeat", req).await?;
        Ok(())
    }

    pub async fn claim(&self, req: &ClaimRequest) -> Result<Option<JobLease>> {
        let resp: ClaimResponse = self.post_json("/v1/jobs/claim", req).await?;
        Ok(resp.job)
    }

    pub async fn report_progress(&self, job_id: &Uuid, req: &ProgressRequest) -> Result<()> {
        let _: AckResponse = self
            .post_json(&format!("/v1/jobs/{}/progress", job_id), req)
            .await?;
        Ok(())
    }

    pub async fn report_outcome(&self, job_id: &Uuid, req: &OutcomeRequest) -> Result<()> {
        let _: AckResponse = self
            .post_json(&format!("/v1/jobs/{}/outcome", job_id), req)
            .await?;
        Ok(())
    }

    pub async fn submit_job(&self, req: &SubmitJobRequest) -> Result<Uuid> {
        let resp: SubmitJobResponse = self.post_json("/v1/jobs", req).await?;
        Ok(resp.id)
    }

    pub async fn job(&self, job_id: &Uuid) -> Result<JobView> {
        self.get_json(&format!("/v1/jobs/{}", job_id)).await
    }

    pub async fn jobs(&self, status: Option<&str>) -> Result<Vec<JobView>> {
        let path = match status {
            Some(s) => format!("/v1/jobs?status={}", s),
            None => "/v1/jobs".to_string(),
        };
        self.get_json(&path).await
    }

    pub async fn cancel_job(&self, job_id: &Uuid) -> Result<()> {
        let _: AckResponse = self
            .post_empty(&format!("/v1/jobs/{}/cancel", job_id))
            .await?;
        Ok(())
    }

    pub async fn workers(&self) -> Result<Vec<WorkerView>> {
        self.get_json("/v1/workers").await
    }
}
