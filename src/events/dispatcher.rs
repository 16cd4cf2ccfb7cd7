use super::bus::EventBus;
use super::handler::{handle_event, LifecycleEventHandler};
use super::models::LifecycleEvent;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delivers bus events to the registered handlers, one event at a time.
///
/// Reads from its own unbounded queue on the bus, so a slow handler delays
/// notifications but never loses them.
pub struct EventDispatcher {
    receiver: mpsc::UnboundedReceiver<LifecycleEvent>,
    handlers: Vec<Arc<dyn LifecycleEventHandler>>,
}

impl EventDispatcher {
    /// Attaches immediately, so nothing emitted after this call is missed.
    pub fn new(bus: &EventBus, handlers: Vec<Arc<dyn LifecycleEventHandler>>) -> Self {
        Self {
            receiver: bus.attach(),
            handlers,
        }
    }

    async fn deliver(&self, event: &LifecycleEvent) {
        for handler in &self.handlers {
            if let Err(e) = handle_event(handler.as_ref(), event).await {
                warn!(
                    "Handler {} failed on {} event: {:#}",
                    handler.name(),
                    event.kind(),
                    e
                );
            }
        }
    }

    /// Runs until `shutdown` fires, then flushes whatever is already queued.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Event dispatcher started with {} handlers",
            self.handlers.len()
        );
        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(event) => self.deliver(&event).await,
                    None => {
                        debug!("Event bus closed");
                        return;
                    }
                },
                _ = shutdown.cancelled() => break,
            }
        }

        loop {
            match self.receiver.try_recv() {
                Ok(event) => self.deliver(&event).await,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        info!("Event dispatcher stopped");
    }
}
