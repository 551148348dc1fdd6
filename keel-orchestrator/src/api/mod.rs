//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod log;
pub mod project;
pub mod run;
pub mod runner;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::repository::Store;
use crate::service::log::LogStore;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub logs: LogStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            logs: LogStore::new(config.log_dir.clone()),
            config: Arc::new(config),
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Support
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Projects & pipelines
        .route("/projects", post(project::create_project))
        .route("/projects/{id}", get(project::get_project))
        .route("/projects/{id}/pipelines", post(project::create_pipeline))
        .route("/pipelines/{id}", get(project::get_pipeline))
        .route("/pipelines/{id}/run", post(run::trigger))
        // Runs
        .route("/runs/{id}", get(run::get_run))
        .route("/runs/{id}/jobs", get(run::list_jobs))
        .route("/runs/{id}/cancel", post(run::cancel))
        .route("/runs/{id}/deploy", post(run::deploy))
        // Runners
        .route("/runners", get(runner::list_runners))
        .route("/runners/heartbeat", post(runner::heartbeat))
        .route("/runners/claim", post(runner::claim))
        // Jobs
        .route("/jobs/{id}/context", get(job::get_context))
        .route("/jobs/{id}/finish", post(job::finish))
        .route("/jobs/{id}/logs", get(log::get_logs).post(log::append_logs))
        .route("/jobs/{id}/logs/stream", get(log::stream_logs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_app() -> (Router, Config) {
        let config = Config {
            log_dir: std::env::temp_dir().join(format!("keel-api-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };
        let state = AppState::new(Arc::new(MemoryStore::new()), config.clone());
        (create_router(state), config)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, text) = send(app, method, uri, body).await;
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn seed_pipeline(app: &Router, yaml: &str) -> i64 {
        let (status, project) = send_json(
            app,
            "POST",
            "/projects",
            Some(json!({
                "name": "demo",
                "execution": { "runMode": "command", "startCommand": "./serve" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, pipeline) = send_json(
            app,
            "POST",
            &format!("/projects/{}/pipelines", project["id"]),
            Some(json!({ "name": "ci", "yaml": yaml })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        pipeline["id"].as_i64().unwrap()
    }

    const ONE_STEP: &str =
        "version: 1\nname: e2e\nstages:\n  - name: build\n    steps:\n      - run: echo ok\n";

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_trigger_claim_logs_finish_flow() {
        let (app, config) = test_app();
        let pipeline_id = seed_pipeline(&app, ONE_STEP).await;

        let (status, run) = send_json(
            &app,
            "POST",
            &format!("/pipelines/{}/run", pipeline_id),
            Some(json!({ "commitSha": "abc", "ref": "main" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(run["status"], "queued");
        assert_eq!(run["ref"], "main");
        let run_id = run["id"].as_i64().unwrap();

        let (status, runner) = send_json(
            &app,
            "POST",
            "/runners/heartbeat",
            Some(json!({ "name": "r1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(runner["status"], "online");

        let (_, job) = send_json(&app, "POST", "/runners/claim", Some(json!({ "name": "r1" }))).await;
        assert_eq!(job["status"], "running");
        assert_eq!(job["command"], "echo ok");
        let job_id = job["id"].as_i64().unwrap();

        let (_, empty) = send_json(&app, "POST", "/runners/claim", Some(json!({ "name": "r2" }))).await;
        assert!(empty.is_null());

        let (status, ack) = send_json(
            &app,
            "POST",
            &format!("/jobs/{}/logs", job_id),
            Some(json!({ "chunk": "\x1b[32mok\x1b[0m\r\n" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, json!({ "success": true }));

        let (_, logs) = send(&app, "GET", &format!("/jobs/{}/logs", job_id), None).await;
        assert_eq!(logs, "ok\n");

        let (status, finished) = send_json(
            &app,
            "POST",
            &format!("/jobs/{}/finish", job_id),
            Some(json!({ "status": "success", "exitCode": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(finished["exitCode"], 0);

        let (_, detail) = send_json(&app, "GET", &format!("/runs/{}", run_id), None).await;
        assert_eq!(detail["run"]["status"], "success");
        assert_eq!(detail["aggregatedStatus"], "success");
        assert_eq!(detail["counts"]["success"], 1);
        assert_eq!(detail["counts"]["total"], 1);

        let (_, metrics) = send(&app, "GET", "/metrics", None).await;
        assert!(metrics.contains("keel_up 1"));
        assert!(metrics.contains("keel_jobs{status=\"success\"} 1"));

        let _ = tokio::fs::remove_dir_all(&config.log_dir).await;
    }

    #[tokio::test]
    async fn test_logs_of_unknown_job_are_empty() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/jobs/999/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_append_logs_unknown_job() {
        let (app, _) = test_app();
        let (status, body) = send_json(
            &app,
            "POST",
            "/jobs/999/logs",
            Some(json!({ "chunk": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_stream_once_emits_existing_content() {
        let (app, config) = test_app();
        let pipeline_id = seed_pipeline(&app, ONE_STEP).await;
        send_json(&app, "POST", &format!("/pipelines/{}/run", pipeline_id), None).await;
        let (_, job) = send_json(&app, "POST", "/runners/claim", Some(json!({ "name": "r1" }))).await;
        let job_id = job["id"].as_i64().unwrap();

        send_json(
            &app,
            "POST",
            &format!("/jobs/{}/logs", job_id),
            Some(json!({ "chunk": "hello\n" })),
        )
        .await;

        let (status, body) = send(
            &app,
            "GET",
            &format!("/jobs/{}/logs/stream?once=1", job_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(": connected"));
        assert!(body.contains("data: hello"));

        let (_, body) = send(
            &app,
            "GET",
            &format!("/jobs/{}/logs/stream?once=true&offset=6", job_id),
            None,
        )
        .await;
        assert!(body.contains(": connected"));
        assert!(!body.contains("data:"));

        let _ = tokio::fs::remove_dir_all(&config.log_dir).await;
    }

    #[tokio::test]
    async fn test_heartbeat_without_name_is_bad_request() {
        let (app, _) = test_app();
        let (status, body) = send_json(&app, "POST", "/runners/heartbeat", Some(json!({ "name": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name is required");

        let (status, _) = send_json(&app, "POST", "/runners/claim", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_finish_queued_job_is_conflict() {
        let (app, _) = test_app();
        let pipeline_id = seed_pipeline(&app, ONE_STEP).await;
        let (_, run) = send_json(&app, "POST", &format!("/pipelines/{}/run", pipeline_id), None).await;
        let (_, jobs) = send_json(&app, "GET", &format!("/runs/{}/jobs", run["id"]), None).await;

        let (status, _) = send_json(
            &app,
            "POST",
            &format!("/jobs/{}/finish", jobs[0]["id"]),
            Some(json!({ "status": "success", "exitCode": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_and_deploy() {
        let (app, _) = test_app();
        let pipeline_id = seed_pipeline(&app, ONE_STEP).await;
        let (_, run) = send_json(&app, "POST", &format!("/pipelines/{}/run", pipeline_id), None).await;

        let (status, deploy) =
            send_json(&app, "POST", &format!("/runs/{}/deploy", run["id"]), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(deploy["stage"], "Deploy");
        assert_eq!(deploy["stepIndex"], 1);

        let (status, canceled) =
            send_json(&app, "POST", &format!("/runs/{}/cancel", run["id"]), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(canceled["status"], "canceled");

        let (_, jobs) = send_json(&app, "GET", &format!("/runs/{}/jobs", run["id"]), None).await;
        for job in jobs.as_array().unwrap() {
            assert_eq!(job["status"], "canceled");
        }
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let (app, _) = test_app();
        let (status, body) = send_json(&app, "GET", "/runs/41", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Run 41 not found");

        let (status, _) = send_json(&app, "POST", "/pipelines/41/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
