use super::cadence::{LastCall, Step, Timing};
use super::domain::ValueDomain;
use crate::event::{ProxyUpdate, UpdateOrigin};
use crate::host::ChargerApi;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Mutable fields of a synchronized entity, guarded by one lock
struct SyncState<V> {
    /// Last confirmed external value; `None` = unknown
    observed: Option<V>,
    /// Pending consumer request; `None` = nothing pending
    desired: Option<V>,
    /// When `desired` was last changed
    desired_since: Instant,
    last_call: Option<LastCall>,
    last_call_at: Option<DateTime<Utc>>,
    /// Target of the actuator call in flight, if any
    pending_write: Option<V>,
    /// Bumped on every restart; a loop only acts while its generation is current
    generation: u64,
    /// The live convergence loop, if any
    task: Option<JoinHandle<()>>,
    detached: bool,
}

/// Point-in-time view of a synchronized entity
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot<V> {
    pub observed: Option<V>,
    pub desired: Option<V>,
    pub last_call_at: Option<DateTime<Utc>>,
    pub last_call_failed: bool,
    pub converging: bool,
}

/// Synchronizer proxies one external entity.
///
/// It keeps the observed and desired value of the entity and owns the
/// convergence loop that drives the external actuator until both match.
/// `request_value` replaces the loop (abort, then spawn); the loop re-reads
/// the entity fields on every iteration, so observed changes pushed by the
/// mirror are picked up without extra signaling.
pub struct Synchronizer<D: ValueDomain> {
    proxy_id: String,
    source: String,
    domain: D,
    timing: Timing,
    api: Arc<dyn ChargerApi>,
    updates: broadcast::Sender<ProxyUpdate>,
    state: Mutex<SyncState<D::Value>>,
    /// Held for the duration of an external write
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

impl<D: ValueDomain> Synchronizer<D> {
    pub fn new(
        proxy_id: impl Into<String>,
        source: impl Into<String>,
        domain: D,
        timing: Timing,
        api: Arc<dyn ChargerApi>,
        updates: broadcast::Sender<ProxyUpdate>,
    ) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            source: source.into(),
            domain,
            timing,
            api,
            updates,
            state: Mutex::new(SyncState {
                observed: None,
                desired: None,
                desired_since: Instant::now(),
                last_call: None,
                last_call_at: None,
                pending_write: None,
                generation: 0,
                task: None,
                detached: false,
            }),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }

    fn lock(&self) -> MutexGuard<'_, SyncState<D::Value>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SyncSnapshot<D::Value> {
        let state = self.lock();
        SyncSnapshot {
            observed: state.observed,
            desired: state.desired,
            last_call_at: state.last_call_at,
            last_call_failed: state.last_call.is_some_and(|call| call.failed),
            converging: state.task.as_ref().is_some_and(|task| !task.is_finished()),
        }
    }

    /// JSON form of a possibly unknown value
    pub fn value_json(&self, value: Option<D::Value>) -> Value {
        value
            .map(|v| self.domain.to_json(v))
            .unwrap_or(Value::Null)
    }

    /// Request a new desired value.
    ///
    /// Normalizes `value`; values outside the domain (e.g. NaN) are
    /// rejected and if it equals the pending desired value nothing happens. Otherwise the running loop (if any) is aborted and a fresh one
    /// is spawned. Never waits for the actuator. Returns whether the loop was
    /// restarted.
    pub fn request_value(self: &Arc<Self>, value: D::Value) -> bool {
        let Some(value) = self.domain.normalize(value) else {
            warn!(
                proxy_id = %self.proxy_id,
                requested = ?value,
                "Ignoring request outside the value domain"
            );
            return false;
        };
        let mut state = self.lock();

        if state.detached {
            warn!(proxy_id = %self.proxy_id, "Ignoring request for detached proxy");
            return false;
        }
        if state.desired == Some(value) {
            debug!(proxy_id = %self.proxy_id, desired = ?value, "Desired value unchanged");
            return false;
        }

        state.desired = Some(value);
        state.desired_since = Instant::now();
        state.generation += 1;
        if let Some(previous) = state.task.take() {
            previous.abort();
        }

        let generation = state.generation;
        state.task = Some(tokio::spawn(Arc::clone(self).run(generation)));

        info!(
            proxy_id = %self.proxy_id,
            desired = ?value,
            observed = ?state.observed,
            "Desired value requested"
        );
        true
    }

    /// Overwrite the observed value and notify observers.
    pub fn observe(&self, value: Option<D::Value>, origin: UpdateOrigin) {
        let value = value.and_then(|v| self.domain.normalize(v));
        let old = {
            let mut state = self.lock();
            if state.detached {
                return;
            }
            std::mem::replace(&mut state.observed, value)
        };

        debug!(
            proxy_id = %self.proxy_id,
            observed = ?value,
            origin = ?origin,
            "Observed value updated"
        );
        self.emit(old, value, origin);
    }

    /// Initial synchronous fetch of the source state.
    ///
    /// A host error or an unparsable state leaves the observed value unknown.
    pub async fn attach(&self) {
        self.refresh(UpdateOrigin::Attach).await;
    }

    /// Re-read the source state, e.g. after missed push notifications
    pub async fn resync(&self) {
        self.refresh(UpdateOrigin::Resync).await;
    }

    async fn refresh(&self, origin: UpdateOrigin) {
        match self.api.current_state(&self.source).await {
            Ok(raw) => {
                let value = self.domain.parse(raw.as_deref());
                if value.is_none() {
                    warn!(
                        proxy_id = %self.proxy_id,
                        source = %self.source,
                        raw = ?raw,
                        "Source state unresolved, treating as unknown"
                    );
                }
                self.observe(value, origin);
            }
            Err(e) => {
                warn!(
                    proxy_id = %self.proxy_id,
                    source = %self.source,
                    error = %e,
                    "Failed to read source state"
                );
            }
        }
    }

    /// Stop the loop for good; later requests and observations are ignored.
    pub fn detach(&self) {
        let mut state = self.lock();
        state.detached = true;
        state.generation += 1;
        if let Some(task) = state.task.take() {
            task.abort();
            debug!(proxy_id = %self.proxy_id, "Aborted convergence loop");
        }
    }

    /// Convergence loop. One iteration evaluates the fields, then stops,
    /// sleeps or calls the actuator.
    ///
    /// While a write is in flight the observed value is stale, so the loop
    /// waits for that write to land before deciding anything.
    async fn run(self: Arc<Self>, generation: u64) {
        loop {
            let pending_write = {
                let state = self.lock();
                if state.generation != generation {
                    return;
                }
                state.pending_write
            };
            if let Some(target) = pending_write {
                debug!(
                    proxy_id = %self.proxy_id,
                    target = ?target,
                    "Waiting for in-flight write"
                );
                let _permit = self.in_flight.lock().await;
                // Nothing can be in flight while we hold the permit
                self.lock().pending_write = None;
                continue;
            }

            let step = {
                let mut state = self.lock();
                if state.generation != generation {
                    return;
                }

                let delta = match state.desired {
                    Some(desired) if state.observed != Some(desired) => {
                        Some(self.domain.delta(desired, state.observed))
                    }
                    _ => None,
                };
                let step = self.timing.next_step(
                    delta,
                    state.desired_since,
                    state.last_call,
                    Instant::now(),
                );

                if step == Step::Stop {
                    if state.desired.take().is_some() {
                        info!(
                            proxy_id = %self.proxy_id,
                            observed = ?state.observed,
                            "Proxy converged"
                        );
                    }
                    // Our own handle; dropping it does not cancel this task
                    state.task = None;
                }
                step
            };

            match step {
                Step::Stop => return,
                Step::Sleep(wait) => {
                    debug!(
                        proxy_id = %self.proxy_id,
                        wait_ms = wait.as_millis() as u64,
                        "Waiting before next evaluation"
                    );
                    tokio::time::sleep(wait).await;
                }
                Step::Actuate => self.actuate(generation).await,
            }
        }
    }

    /// Drive the external entity to the desired value.
    ///
    /// Re-reads the true source state first and skips the call if the device
    /// already converged. The call itself runs in its own task holding the
    /// in-flight permit, so aborting the loop never cuts a request in half and
    /// a replacement loop waits for it before writing again. That task also
    /// records the outcome, whichever loop is current by then.
    async fn actuate(self: &Arc<Self>, generation: u64) {
        let permit = Arc::clone(&self.in_flight).lock_owned().await;

        let desired = {
            let state = self.lock();
            match state.desired {
                Some(desired) if state.generation == generation => desired,
                _ => return,
            }
        };

        let current = match self.api.current_state(&self.source).await {
            Ok(raw) => self.domain.parse(raw.as_deref()),
            Err(e) => {
                warn!(
                    proxy_id = %self.proxy_id,
                    error = %e,
                    "Failed to re-read source state before actuation"
                );
                None
            }
        };

        let command = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }

            if current == Some(desired) {
                let old = state.observed.replace(desired);
                drop(state);
                info!(
                    proxy_id = %self.proxy_id,
                    desired = ?desired,
                    "Source already at desired value, skipping actuator call"
                );
                if old != Some(desired) {
                    self.emit(old, Some(desired), UpdateOrigin::Resync);
                }
                return;
            }

            state.last_call = Some(LastCall {
                at: Instant::now(),
                failed: false,
            });
            state.last_call_at = Some(Utc::now());
            state.pending_write = Some(desired);
            self.domain.command(desired)
        };

        info!(
            proxy_id = %self.proxy_id,
            source = %self.source,
            command = %command,
            "Calling actuator"
        );

        let this = Arc::clone(self);
        let call = tokio::spawn(async move {
            let _permit = permit;
            let result = command.dispatch(this.api.as_ref(), &this.source).await;
            this.finish_write(desired, result);
        });
        if let Err(e) = call.await {
            warn!(proxy_id = %self.proxy_id, error = %e, "Actuator task failed");
        }
    }

    /// Record the outcome of an actuator call. Called with the in-flight
    /// permit still held.
    fn finish_write(&self, written: D::Value, result: anyhow::Result<()>) {
        let mut state = self.lock();
        state.pending_write = None;

        match result {
            Ok(()) => {
                if state.detached {
                    return;
                }
                let old = state.observed.replace(written);
                drop(state);
                self.emit(old, Some(written), UpdateOrigin::Actuator);
            }
            Err(e) => {
                // Marked even when the calling loop was superseded
                if let Some(call) = state.last_call.as_mut() {
                    call.failed = true;
                }
                drop(state);
                warn!(
                    proxy_id = %self.proxy_id,
                    source = %self.source,
                    error = %e,
                    "Actuator call failed, retrying after cooldown"
                );
            }
        }
    }

    fn emit(&self, old: Option<D::Value>, new: Option<D::Value>, origin: UpdateOrigin) {
        let update = ProxyUpdate {
            proxy_id: self.proxy_id.clone(),
            source: self.source.clone(),
            old_value: self.value_json(old),
            new_value: self.value_json(new),
            origin,
            timestamp: Utc::now(),
        };
        // No subscribers is fine
        let _ = self.updates.send(update);
    }
}
