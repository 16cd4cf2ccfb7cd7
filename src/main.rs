use anyhow::{Context, Result};
use clap::Parser;
use reposter_server::background_jobs::jobs::{
    DailySummaryJob, DownloadDrainJob, LeaseRecoveryJob, PostDispatchJob, PromotionJob,
    StorageReaperJob, SystemStatusJob,
};
use reposter_server::background_jobs::{create_coordinator, PipelineComponents};
use reposter_server::clock::{Clock, SystemClock};
use reposter_server::config::{self, AppConfig, FileConfig};
use reposter_server::download_queue::{DownloadQueue, DownloaderRegistry, HttpDownloader};
use reposter_server::events::{
    EventBus, EventDispatcher, LifecycleEventHandler, TracingEventHandler, WebhookNotifier,
};
use reposter_server::pipeline_store::{FullPipelineStore, SqlitePipelineStore};
use reposter_server::post_scheduler::{HttpPublisher, PostScheduler, Publisher};
use reposter_server::server::{self, metrics, ServerState};
use reposter_server::storage::{durable_from_settings, LocalTier, StorageTierManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding pipeline.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Local tier root. Defaults to <db_dir>/media.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// The port for the operational endpoints (metrics, health, status).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// URL of the media fetch service used by the default downloader.
    #[clap(long)]
    pub downloader_url: Option<String>,

    /// Timeout in seconds for downloader requests.
    #[clap(long, default_value_t = 300)]
    pub downloader_timeout_sec: u64,

    /// URL of the platform publish service. Posts are not dispatched without it.
    #[clap(long)]
    pub publisher_url: Option<String>,

    /// Timeout in seconds for publish requests.
    #[clap(long, default_value_t = 60)]
    pub publisher_timeout_sec: u64,

    /// Webhook receiving failures, published posts, summaries and status changes.
    #[clap(long)]
    pub notification_webhook_url: Option<String>,

    /// Days a promoted video stays in the durable tier.
    #[clap(long)]
    pub retention_days: Option<u32>,

    /// Enables a filesystem durable tier rooted here.
    #[clap(long, value_parser = parse_path)]
    pub durable_dir: Option<PathBuf>,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            media_path: args.media_path.clone(),
            metrics_port: args.metrics_port,
            downloader_url: args.downloader_url.clone(),
            downloader_timeout_sec: args.downloader_timeout_sec,
            publisher_url: args.publisher_url.clone(),
            publisher_timeout_sec: args.publisher_timeout_sec,
            notification_webhook_url: args.notification_webhook_url.clone(),
            retention_days: args.retention_days,
            durable_dir: args.durable_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize tracing")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&config::CliConfig::from(&cli_args), file_config)?;
    info!("Resolved configuration: {:?}", app_config);

    info!(
        "Opening pipeline database at {:?}...",
        app_config.pipeline_db_path()
    );
    let store: Arc<dyn FullPipelineStore> =
        Arc::new(SqlitePipelineStore::new(app_config.pipeline_db_path())?);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::new();

    let durable = match &app_config.storage.durable {
        Some(settings) => Some(
            durable_from_settings(settings)
                .await
                .context("Failed to set up durable storage")?,
        ),
        None => None,
    };
    let local = LocalTier::new(app_config.local_videos_dir());
    let storage = Arc::new(StorageTierManager::new(
        Arc::clone(&store),
        durable,
        local.clone(),
        app_config.storage.clone(),
        Arc::clone(&clock),
        events.clone(),
    ));
    storage
        .ensure_container()
        .await
        .context("Failed to prepare storage tiers")?;

    let download_queue = Arc::new(DownloadQueue::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        app_config.download_queue.clone(),
        events.clone(),
    ));

    let mut downloaders = DownloaderRegistry::new();
    downloaders.register(Arc::new(HttpDownloader::new(
        app_config.download_queue.default_service.clone(),
        app_config.downloader_url.clone(),
        app_config.downloader_timeout_sec,
        local,
    )?));
    if app_config.downloader_url.is_none() {
        info!("No downloader URL configured, jobs must carry direct media URLs");
    }

    let publisher: Option<Arc<dyn Publisher>> = match &app_config.publisher_url {
        Some(url) => {
            let publisher = HttpPublisher::new(url.clone(), app_config.publisher_timeout_sec)?;
            if let Err(e) = publisher.health_check().await {
                warn!("Publish service at {} is not healthy yet: {}", url, e);
            }
            Some(Arc::new(publisher) as Arc<dyn Publisher>)
        }
        None => None,
    };
    let post_scheduler = Arc::new(PostScheduler::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        app_config.post_scheduler.clone(),
        events.clone(),
        Arc::clone(&storage),
        publisher,
    ));

    let mut handlers: Vec<Arc<dyn LifecycleEventHandler>> =
        vec![Arc::new(TracingEventHandler) as Arc<dyn LifecycleEventHandler>];
    if let Some(url) = &app_config.notification_webhook_url {
        info!("Forwarding alerts to {}", url);
        handlers.push(Arc::new(WebhookNotifier::new(url.clone(), 10)?));
    }
    let dispatcher = EventDispatcher::new(&events, handlers);

    let shutdown_token = CancellationToken::new();
    let components = PipelineComponents {
        store,
        clock,
        download_queue: Arc::clone(&download_queue),
        downloaders: Arc::new(downloaders),
        post_scheduler: Arc::clone(&post_scheduler),
        storage: Arc::clone(&storage),
        events,
    };
    let (mut coordinator, coordinator_handle) =
        create_coordinator(components, shutdown_token.clone());

    coordinator
        .register_job(Arc::new(LeaseRecoveryJob::new(Duration::from_secs(
            app_config.background_jobs.lease_recovery_interval_secs,
        ))))
        .await;
    coordinator
        .register_job(Arc::new(DownloadDrainJob::new(Duration::from_secs(
            app_config.download_queue.drain_interval_secs,
        ))))
        .await;
    coordinator
        .register_job(Arc::new(PromotionJob::new(Duration::from_secs(
            app_config.storage.promotion_interval_secs,
        ))))
        .await;
    coordinator
        .register_job(Arc::new(PostDispatchJob::new(Duration::from_secs(
            app_config.post_scheduler.dispatch_interval_secs,
        ))))
        .await;
    coordinator
        .register_job(Arc::new(StorageReaperJob::new(
            app_config.storage.reaper_interval,
        )))
        .await;
    coordinator
        .register_job(Arc::new(DailySummaryJob::new(
            app_config.background_jobs.daily_summary_interval,
        )))
        .await;
    coordinator.register_job(Arc::new(SystemStatusJob)).await;
    coordinator.set_event_dispatcher(dispatcher);

    let server_state = ServerState {
        coordinator: coordinator_handle,
        download_queue,
        post_scheduler,
        storage,
    };
    let server_token = shutdown_token.clone();
    let metrics_port = app_config.metrics_port;
    let server_task = tokio::spawn(async move {
        let result = server::run_server(server_state, metrics_port, server_token.clone()).await;
        if let Err(e) = &result {
            error!("Operational server stopped: {:?}", e);
        }
        // The pipeline goes down with the server.
        server_token.cancel();
        result
    });

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                }
                signal_token.cancel();
            }
            _ = signal_token.cancelled() => {}
        }
    });

    // Returns once shutdown was requested and running jobs drained.
    coordinator.run().await;
    info!("Lifecycle coordinator stopped");

    server_task.await.context("Operational server task panicked")?
}
