use super::domain::ValueDomain;
use super::synchronizer::Synchronizer;
use crate::event::{SourceStateChanged, UpdateOrigin};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Mirror keeps a proxy's observed value in line with the external entity.
///
/// Purely reactive: it overwrites the observed value on every push
/// notification for its source and never touches the convergence loop.
pub struct Mirror<D: ValueDomain> {
    sync: Arc<Synchronizer<D>>,
    events: broadcast::Receiver<SourceStateChanged>,
}

impl<D: ValueDomain> Mirror<D> {
    /// The receiver should be subscribed before the proxy's initial fetch so
    /// no change between fetch and spawn is lost.
    pub fn new(sync: Arc<Synchronizer<D>>, events: broadcast::Receiver<SourceStateChanged>) -> Self {
        Self { sync, events }
    }

    /// Apply one push notification. Returns false if it was for another source.
    pub fn handle(&self, event: &SourceStateChanged) -> bool {
        if event.source != self.sync.source() {
            return false;
        }

        let value = self.sync.domain().parse(event.new_state.as_deref());
        if value.is_none() {
            debug!(
                proxy_id = %self.sync.proxy_id(),
                new_state = ?event.new_state,
                "Unresolved source state, observed value now unknown"
            );
        }
        self.sync.observe(value, UpdateOrigin::Mirror);
        true
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!(
            proxy_id = %self.sync.proxy_id(),
            source = %self.sync.source(),
            "Mirror started"
        );

        loop {
            match self.events.recv().await {
                Ok(event) => {
                    self.handle(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        proxy_id = %self.sync.proxy_id(),
                        skipped = skipped,
                        "Mirror lagged, re-reading source state"
                    );
                    self.sync.resync().await;
                }
                Err(RecvError::Closed) => {
                    debug!(proxy_id = %self.sync.proxy_id(), "Event bus closed, mirror stopping");
                    break;
                }
            }
        }
    }
}
