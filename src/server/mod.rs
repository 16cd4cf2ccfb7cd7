//! Operational HTTP surface: Prometheus metrics, health and a status
//! snapshot of the pipeline.

pub mod metrics;

use crate::background_jobs::{CoordinatorHandle, JobError, JobInfo};
use crate::download_queue::DownloadQueue;
use crate::pipeline_store::{DownloadQueueStats, PostStats};
use crate::post_scheduler::PostScheduler;
use crate::storage::{StorageStats, StorageTierManager};
use anyhow::Result;
use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ServerState {
    pub coordinator: CoordinatorHandle,
    pub download_queue: Arc<DownloadQueue>,
    pub post_scheduler: Arc<PostScheduler>,
    pub storage: Arc<StorageTierManager>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub durable_tier: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub downloads: DownloadQueueStats,
    pub posts: PostStats,
    pub storage: StorageStats,
    pub jobs: Vec<JobInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn record_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics::record_http_request(&method, &path, response.status().as_u16());
    response
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    if !state.storage.is_durable_enabled() {
        return (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                durable_tier: "disabled",
            }),
        );
    }
    match state.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                durable_tier: "ok",
            }),
        ),
        Err(e) => {
            warn!("Durable tier health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    durable_tier: "unavailable",
                }),
            )
        }
    }
}

async fn status(State(state): State<ServerState>) -> Response {
    let snapshot = async {
        Ok::<_, crate::error::PipelineError>(StatusSnapshot {
            downloads: state.download_queue.stats()?,
            posts: state.post_scheduler.stats()?,
            storage: state.storage.stats().await?,
            jobs: state.coordinator.list_jobs().await,
        })
    }
    .await;
    match snapshot {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn trigger_job(State(state): State<ServerState>, Path(job_id): Path<String>) -> Response {
    match state.coordinator.trigger_job(&job_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(JobError::NotFound) => error_response(StatusCode::NOT_FOUND, JobError::NotFound),
        Err(JobError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, JobError::AlreadyRunning)
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/jobs/{job_id}/trigger", post(trigger_job))
        .layer(middleware::from_fn(record_requests))
        .with_state(state)
}

/// Serves the operational endpoints until `shutdown` fires.
pub async fn run_server(state: ServerState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = make_app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Operational endpoints listening on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
