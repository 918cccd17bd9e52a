use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::coordinator::auth;
use crate::error::FleetError;
use crate::protocol::{
    AckResponse, ClaimRequest, ClaimResponse, ErrorResponse, HealthResponse, HeartbeatRequest,
    JobLease, JobView, OutcomeRequest, ProgressRequest, SubmitJobRequest, SubmitJobResponse,
    WorkerView,
};
use crate::registry::job::JobStatus;
use crate::registry::Registry;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
}

/// Build the coordinator's HTTP surface. Everything under `/v1` sits behind
/// the shared-secret layer; `/health` does not.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/v1/workers/heartbeat", post(heartbeat_handler))
        .route("/v1/workers", get(list_workers_handler))
        .route("/v1/jobs/claim", post(claim_handler))
        .route("/v1/jobs", post(submit_job_handler))
        .route("/v1/jobs", get(list_jobs_handler))
        .route("/v1/jobs/:id", get(get_job_handler))
        .route("/v1/jobs/:id/progress", post(report_progress_handler))
        .route("/v1/jobs/:id/outcome", post(report_outcome_handler))
        .route("/v1/jobs/:id/cancel", post(cancel_job_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

fn error_response(err: FleetError) -> Response {
    let status = match &err {
        FleetError::JobNotFound(_) => StatusCode::NOT_FOUND,
        FleetError::LeaseConflict(_) => StatusCode::CONFLICT,
        FleetError::InvalidRequest(_) | FleetError::InvalidTier(_) => StatusCode::BAD_REQUEST,
        FleetError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn ack() -> Response {
    (StatusCode::OK, Json(AckResponse { ack: true })).into_response()
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn heartbeat_handler(
    State(state): State<ApiState>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    match state.registry.heartbeat(&req).await {
        Ok(()) => ack(),
        Err(err) => error_response(err),
    }
}

async fn claim_handler(State(state): State<ApiState>, Json(req): Json<ClaimRequest>) -> Response {
    match state.registry.claim(&req).await {
        Ok(job) => (
            StatusCode::OK,
            Json(ClaimResponse {
                job: job.as_ref().map(JobLease::from),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn report_progress_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> Response {
    // Stale reports ack like applied ones; the registry already logged them.
    match state.registry.report_progress(&id, &req).await {
        Ok(_) => ack(),
        Err(err) => error_response(err),
    }
}

async fn report_outcome_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OutcomeRequest>,
) -> Response {
    match state.registry.report_outcome(&id, &req).await {
        Ok(_) => ack(),
        Err(err) => error_response(err),
    }
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    Json(req): Json<SubmitJobRequest>,
) -> Response {
    match state.registry.submit(req).await {
        Ok(job) => (StatusCode::OK, Json(SubmitJobResponse { id: job.id })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_job_handler(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.registry.job(&id).await {
        Some(job) => (StatusCode::OK, Json(JobView::from(&job))).into_response(),
        None => error_response(FleetError::JobNotFound(id)),
    }
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<JobStatus>,
}

async fn list_jobs_handler(
    State(state): State<ApiState>,
    Query(query): Query<ListJobsQuery>,
) -> Response {
    let jobs = state.registry.jobs(query.status).await;
    let views: Vec<JobView> = jobs.iter().map(JobView::from).collect();
    (StatusCode::OK, Json(views)).into_response()
}

async fn cancel_job_handler(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.registry.cancel(&id).await {
        Ok(()) => ack(),
        Err(err) => error_response(err),
    }
}

async fn list_workers_handler(State(state): State<ApiState>) -> Response {
    let timeout = state.registry.config().heartbeat_timeout;
    let now = Utc::now();
    let views: Vec<WorkerView> = state
        .registry
        .workers()
        .await
        .iter()
        .map(|w| WorkerView::from_record(w, w.is_live(timeout, now)))
        .collect();
    (StatusCode::OK, Json(views)).into_response()
}
