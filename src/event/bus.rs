use super::SourceStateChanged;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// Inbound push channel for external state changes.
///
/// A single FIFO broadcast channel: every mirror sees every event in publish
/// order and filters by source, so per-source order is preserved.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SourceStateChanged>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a state change. Returns the number of receivers reached.
    pub fn publish(&self, event: SourceStateChanged) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(source = %event.source, "No mirrors subscribed, dropping state change");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceStateChanged> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
