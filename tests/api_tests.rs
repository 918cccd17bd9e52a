//! HTTP surface tests driven through the router with `tower::ServiceExt`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use gpu_fleet::config::CoordinatorConfig;
use gpu_fleet::coordinator::api::{self, ApiState};
use gpu_fleet::protocol::{ClaimRequest, API_KEY_HEADER};
use gpu_fleet::registry::job::JobStatus;
use gpu_fleet::registry::worker::Tier;
use gpu_fleet::registry::Registry;

const KEY: &str = "secret-key";

fn test_app(config: CoordinatorConfig) -> (Router, Arc<Registry>) {
    let registry = Arc::new(Registry::new(config));
    let app = api::router(ApiState {
        registry: registry.clone(),
    });
    (app, registry)
}

fn authed_config() -> CoordinatorConfig {
    CoordinatorConfig {
        api_key: KEY.to_string(),
        ..CoordinatorConfig::default()
    }
}

/// Send one request through the router and decode the JSON answer.
async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn submit_body() -> Value {
    json!({
        "payload": {
            "video_url": "https://media.example.com/in/clip.mp4",
            "audio_url": "https://media.example.com/in/track.wav",
            "resolution": "720p"
        }
    })
}

fn heartbeat_body(worker_id: &str) -> Value {
    json!({
        "worker_id": worker_id,
        "status": "idle",
        "tier": "primary",
        "provider": "vast",
        "gpu_class": "rtx4090"
    })
}

async fn claim_directly(registry: &Registry, worker_id: &str, tier: Tier) -> Uuid {
    registry
        .claim(&ClaimRequest {
            worker_id: worker_id.to_string(),
            tier,
            gpu_class: "rtx4090".to_string(),
        })
        .await
        .unwrap()
        .unwrap()
        .id
}

#[tokio::test]
async fn test_health_is_open_without_a_key() {
    let (app, _registry) = test_app(authed_config());

    let (status, body) = request(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_protocol_routes_require_the_key() {
    let (app, _registry) = test_app(authed_config());

    let (status, body) = request(&app, "POST", "/v1/jobs", None, Some(submit_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("api key"));

    let (status, _) = request(&app, "POST", "/v1/jobs", Some("wrong"), Some(submit_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(&app, "GET", "/v1/workers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_key_disables_auth() {
    let (app, _registry) = test_app(CoordinatorConfig::default());

    let (status, _) = request(&app, "GET", "/v1/workers", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_heartbeat_acks() {
    let (app, registry) = test_app(authed_config());

    let (status, body) = request(
        &app,
        "POST",
        "/v1/workers/heartbeat",
        Some(KEY),
        Some(heartbeat_body("w1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ack"], true);

    assert!(registry.worker("w1").await.is_some());
}

#[tokio::test]
async fn test_submit_then_fetch_job() {
    let (app, _registry) = test_app(authed_config());

    let (status, body) = request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, job) = request(&app, "GET", &format!("/v1/jobs/{}", id), Some(KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["attempt"], 0);
    assert_eq!(
        job["payload"]["video_url"],
        "https://media.example.com/in/clip.mp4"
    );

    let (status, _) = request(
        &app,
        "GET",
        &format!("/v1/jobs/{}", Uuid::new_v4()),
        Some(KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_with_missing_fields_is_rejected() {
    let (app, _registry) = test_app(authed_config());

    let (status, _) = request(
        &app,
        "POST",
        "/v1/jobs",
        Some(KEY),
        Some(json!({ "payload": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_claim_answers_null_when_idle() {
    let (app, _registry) = test_app(authed_config());

    let body = json!({ "worker_id": "w1", "tier": "primary", "gpu_class": "rtx4090" });
    let (status, answer) = request(&app, "POST", "/v1/jobs/claim", Some(KEY), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(answer["job"].is_null());
}

#[tokio::test]
async fn test_submit_claim_roundtrip() {
    let (app, _registry) = test_app(authed_config());

    request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;

    let body = json!({ "worker_id": "w1", "tier": "primary", "gpu_class": "rtx4090" });
    let (status, answer) = request(&app, "POST", "/v1/jobs/claim", Some(KEY), Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    let lease = &answer["job"];
    assert_eq!(lease["attempt"], 1);
    assert!(lease["lease_expires_at"].is_string());
    assert_eq!(
        lease["payload"]["video_url"],
        "https://media.example.com/in/clip.mp4"
    );

    // The same worker asking again while holding a lease is a conflict.
    let body = json!({ "worker_id": "w1", "tier": "primary", "gpu_class": "rtx4090" });
    let (status, _) = request(&app, "POST", "/v1/jobs/claim", Some(KEY), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_progress_validation_and_unknown_job() {
    let (app, registry) = test_app(authed_config());

    let (_, body) = request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    let id = body["id"].as_str().unwrap().to_string();
    claim_directly(&registry, "w1", Tier::Primary).await;

    let bad = json!({ "worker_id": "w1", "phase": "inferring", "progress": 1.5 });
    let (status, _) = request(
        &app,
        "POST",
        &format!("/v1/jobs/{}/progress", id),
        Some(KEY),
        Some(bad),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let ok = json!({ "worker_id": "w1", "phase": "inferring", "progress": 0.5 });
    let (status, _) = request(
        &app,
        "POST",
        &format!("/v1/jobs/{}/progress", Uuid::new_v4()),
        Some(KEY),
        Some(ok.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(
        &app,
        "POST",
        &format!("/v1/jobs/{}/progress", id),
        Some(KEY),
        Some(ok),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ack"], true);
}

#[tokio::test]
async fn test_stale_outcome_acks_but_changes_nothing() {
    let (app, registry) = test_app(authed_config());

    let (_, body) = request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    let id = body["id"].as_str().unwrap().to_string();
    claim_directly(&registry, "w1", Tier::Primary).await;

    let outcome = json!({
        "worker_id": "ghost",
        "outcome": "succeeded",
        "artifact": { "bucket": "b", "key": "k" }
    });
    let (status, body) = request(
        &app,
        "POST",
        &format!("/v1/jobs/{}/outcome", id),
        Some(KEY),
        Some(outcome),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ack"], true);

    let job = registry.job(&id.parse().unwrap()).await.unwrap();
    assert_eq!(job.status, JobStatus::Leased);
    assert!(job.artifact.is_none());
}

#[tokio::test]
async fn test_cancel_pending_then_conflict_once_leased() {
    let (app, registry) = test_app(authed_config());

    let (_, body) = request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    let first = body["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app,
        "POST",
        &format!("/v1/jobs/{}/cancel", first),
        Some(KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ack"], true);

    let (_, body) = request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    let second = body["id"].as_str().unwrap().to_string();
    claim_directly(&registry, "w1", Tier::Primary).await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/v1/jobs/{}/cancel", second),
        Some(KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("leased"));
}

#[tokio::test]
async fn test_workers_listing_carries_the_liveness_verdict() {
    let config = CoordinatorConfig {
        api_key: KEY.to_string(),
        heartbeat_timeout: Duration::from_millis(100),
        ..CoordinatorConfig::default()
    };
    let (app, _registry) = test_app(config);

    request(
        &app,
        "POST",
        "/v1/workers/heartbeat",
        Some(KEY),
        Some(heartbeat_body("w1")),
    )
    .await;

    let (status, body) = request(&app, "GET", "/v1/workers", Some(KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    let workers = body.as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["live"], true);
    assert_eq!(workers[0]["tier"], "primary");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let (_, body) = request(&app, "GET", "/v1/workers", Some(KEY), None).await;
    assert_eq!(body.as_array().unwrap()[0]["live"], false);
}

#[tokio::test]
async fn test_jobs_listing_filters_by_status() {
    let (app, registry) = test_app(authed_config());

    request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    request(&app, "POST", "/v1/jobs", Some(KEY), Some(submit_body())).await;
    claim_directly(&registry, "w1", Tier::Primary).await;

    let (_, all) = request(&app, "GET", "/v1/jobs", Some(KEY), None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, pending) = request(&app, "GET", "/v1/jobs?status=pending", Some(KEY), None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["status"], "pending");

    let (_, leased) = request(&app, "GET", "/v1/jobs?status=leased", Some(KEY), None).await;
    assert_eq!(leased.as_array().unwrap().len(), 1);
    assert_eq!(leased[0]["lease_holder"], "w1");
}
