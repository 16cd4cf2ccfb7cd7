use crate::pipeline_store::{DownloadQueueStats, PostStats};
use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all pipeline metrics
const PREFIX: &str = "reposter";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    // Download Queue Metrics
    pub static ref DOWNLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_downloads_total"), "Download attempts by outcome"),
        &["service", "outcome"]
    ).expect("Failed to create downloads_total metric");

    pub static ref DOWNLOAD_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_download_duration_seconds"),
            "Time spent downloading one video"
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["service"]
    ).expect("Failed to create download_duration_seconds metric");

    pub static ref DOWNLOAD_QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_download_queue_depth"), "Download jobs by status"),
        &["status"]
    ).expect("Failed to create download_queue_depth metric");

    // Post Scheduler Metrics
    pub static ref POSTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_posts_total"), "Publish attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create posts_total metric");

    pub static ref PUBLISH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_publish_duration_seconds"),
            "Time spent in the publish call"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0])
    ).expect("Failed to create publish_duration_seconds metric");

    pub static ref POST_QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_post_queue_depth"), "Scheduled posts by status"),
        &["status"]
    ).expect("Failed to create post_queue_depth metric");

    // Storage Metrics
    pub static ref PROMOTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_promotions_total"), "Durable tier promotions by outcome"),
        &["outcome"]
    ).expect("Failed to create promotions_total metric");

    pub static ref REAPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_reaped_total"), "Expired artifacts processed by the reaper"),
        &["outcome"]
    ).expect("Failed to create reaped_total metric");

    pub static ref DURABLE_FILES: Gauge = Gauge::new(
        format!("{PREFIX}_durable_files"),
        "Artifacts in the durable tier"
    ).expect("Failed to create durable_files metric");

    pub static ref DURABLE_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_durable_size_bytes"),
        "Bytes stored in the durable tier"
    ).expect("Failed to create durable_size_bytes metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job runs by status"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "1 while a job is executing"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOAD_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOAD_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(POSTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUBLISH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(POST_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(PROMOTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REAPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DURABLE_FILES.clone()));
    let _ = REGISTRY.register(Box::new(DURABLE_SIZE_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
}

/// `outcome` is one of `completed`, `retrying`, `failed`.
pub fn record_download_outcome(service: &str, outcome: &str) {
    DOWNLOADS_TOTAL.with_label_values(&[service, outcome]).inc();
}

pub fn record_download_duration(service: &str, duration: Duration) {
    DOWNLOAD_DURATION_SECONDS
        .with_label_values(&[service])
        .observe(duration.as_secs_f64());
}

pub fn set_download_queue_depth(stats: &DownloadQueueStats) {
    for (status, count) in [
        ("pending", stats.pending),
        ("in_progress", stats.in_progress),
        ("completed", stats.completed),
        ("failed", stats.failed),
    ] {
        DOWNLOAD_QUEUE_DEPTH
            .with_label_values(&[status])
            .set(count as f64);
    }
}

/// `outcome` is one of `posted`, `retrying`, `failed`.
pub fn record_post_outcome(outcome: &str) {
    POSTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_publish_duration(duration: Duration) {
    PUBLISH_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn set_post_queue_depth(stats: &PostStats) {
    for (status, count) in [
        ("queued", stats.queued),
        ("posting", stats.posting),
        ("posted", stats.posted),
        ("failed", stats.failed),
    ] {
        POST_QUEUE_DEPTH
            .with_label_values(&[status])
            .set(count as f64);
    }
}

/// `outcome` is `promoted` or `failed`.
pub fn record_promotion(outcome: &str) {
    PROMOTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_reap(deleted: usize, errors: usize) {
    REAPED_TOTAL
        .with_label_values(&["deleted"])
        .inc_by(deleted as f64);
    REAPED_TOTAL
        .with_label_values(&["error"])
        .inc_by(errors as f64);
}

pub fn set_durable_usage(files: usize, bytes: u64) {
    DURABLE_FILES.set(files as f64);
    DURABLE_SIZE_BYTES.set(bytes as f64);
}

/// Record one background job execution
pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
