//! Local notification webhook
//!
//! Collects every JSON body POSTed to it, standing in for the external
//! notification service.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct WebhookReceiver {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    shutdown: CancellationToken,
}

async fn collect(
    State(received): State<Arc<Mutex<Vec<Value>>>>,
    Json(body): Json<Value>,
) -> StatusCode {
    received.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

impl WebhookReceiver {
    pub async fn spawn() -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/hook", post(collect))
            .with_state(received.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Webhook receiver failed");
        });

        Self {
            url: format!("http://127.0.0.1:{}/hook", port),
            received,
            shutdown,
        }
    }

    /// `type` tags of the bodies received so far, in arrival order.
    pub fn kinds(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|body| body["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Polls until `count` bodies have arrived.
    pub async fn wait_for(&self, count: usize) {
        let start = std::time::Instant::now();
        while self.received.lock().unwrap().len() < count {
            if start.elapsed() > Duration::from_secs(5) {
                panic!(
                    "expected {} webhook calls, got {:?}",
                    count,
                    self.kinds()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for WebhookReceiver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
