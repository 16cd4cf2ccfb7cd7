//! Test server lifecycle management
//!
//! Spawns the operational HTTP surface over a [`TestPipeline`] with a
//! running coordinator. Dropping the server shuts both down.

use super::constants::SERVER_READY_TIMEOUT_MS;
use super::pipeline::TestPipeline;
use reposter_server::background_jobs::CoordinatorHandle;
use reposter_server::server::{make_app, metrics, ServerState};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    pub pipeline: TestPipeline,
    pub coordinator: CoordinatorHandle,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Binds to a random port and waits until `/health` answers.
    pub async fn spawn() -> Self {
        metrics::init_metrics();
        let pipeline = TestPipeline::new();
        let shutdown = CancellationToken::new();

        let (mut coordinator, handle) = pipeline.coordinator(shutdown.clone()).await;
        tokio::spawn(async move { coordinator.run().await });

        let app = make_app(ServerState {
            coordinator: handle.clone(),
            download_queue: pipeline.queue().clone(),
            post_scheduler: pipeline.scheduler().clone(),
            storage: pipeline.storage().clone(),
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            pipeline,
            coordinator: handle,
            shutdown,
        };
        server.wait_for_ready().await;
        server
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);
        while start.elapsed() < timeout {
            if let Ok(response) = client.get(self.url("/health")).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Test server did not become ready within {:?}", timeout);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
