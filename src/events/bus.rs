use super::models::LifecycleEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel for lifecycle events.
///
/// Cloned into every component that emits. Real-time observers call
/// [`EventBus::subscribe`]; slow subscribers lag rather than block emitters.
/// Delivery queues from [`EventBus::attach`] are unbounded and never drop,
/// which is what notification delivery needs.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
    queues: Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            queues: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let kind = event.kind();
        {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues.retain(|queue| queue.send(event.clone()).is_ok());
        }
        // An error only means nobody is listening right now.
        if self.tx.send(event).is_err() {
            trace!("Dropped {} event, no subscribers", kind);
        }
    }

    /// Every event emitted from now on, in order, without loss. The queue
    /// detaches once its receiver is dropped.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
