// Registry of attached proxies, owned by the integration lifecycle

use crate::config::{EntityConfig, EntityKind, ProxyConfig};
use crate::event::{EventBus, ProxyUpdate};
use crate::host::ChargerApi;
use crate::sync::{
    CurrentDomain, Mirror, SwitchDomain, SyncSnapshot, Synchronizer, Timing, ValueDomain,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;


/// Static description of a proxy
#[derive(Clone, Debug, Serialize)]
pub struct ProxyDescriptor {
    pub id: String,
    /// Display name (e.g., "Blacky Charging Current Proxy")
    pub name: String,
    pub vehicle: String,
    pub source: String,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl ProxyDescriptor {
    pub fn from_config(entity: &EntityConfig) -> Self {
        let (unit, min, max, step) = match entity.kind {
            EntityKind::Current => {
                let (min, max) = entity.range();
                (Some("A"), Some(min), Some(max), Some(1.0))
            }
            EntityKind::Switch => (None, None, None, None),
        };

        Self {
            id: entity.proxy_id(),
            name: entity.display_name(),
            vehicle: entity.name.clone(),
            source: entity.source.clone(),
            kind: entity.kind,
            device_id: entity.device_id.clone(),
            unit,
            min,
            max,
            step,
        }
    }
}

/// Serializable state of a proxy
#[derive(Clone, Debug, Serialize)]
pub struct ProxyView {
    #[serde(flatten)]
    pub descriptor: ProxyDescriptor,
    /// Observed value; null while unknown
    pub value: Value,
    /// Pending desired value; null when converged
    pub desired: Value,
    pub last_actuated_at: Option<DateTime<Utc>>,
    pub last_call_failed: bool,
    pub converging: bool,
}

/// Result of a consumer request
#[derive(Clone, Debug, Serialize)]
pub struct RequestOutcome {
    /// False when the value was already pending
    pub scheduled: bool,
    pub proxy: ProxyView,
}

/// Errors returned to consumers of the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    UnknownProxy(String),
    InvalidValue { proxy_id: String, kind: EntityKind, value: Value },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::UnknownProxy(id) => write!(f, "unknown proxy '{}'", id),
            RequestError::InvalidValue {
                proxy_id,
                kind,
                value,
            } => {
                let expected = match kind {
                    EntityKind::Current => "a number",
                    EntityKind::Switch => "a boolean",
                };
                write!(
                    f,
                    "invalid value {} for proxy '{}': expected {}",
                    value, proxy_id, expected
                )
            }
        }
    }
}

impl std::error::Error for RequestError {}

/// A synchronizer of either value domain
#[derive(Clone)]
enum ProxyHandle {
    Current(Arc<Synchronizer<CurrentDomain>>),
    Switch(Arc<Synchronizer<SwitchDomain>>),
}

impl ProxyHandle {
    /// Request a value given as JSON. `None` if it does not fit the domain.
    fn request_json(&self, value: &Value) -> Option<bool> {
        match self {
            ProxyHandle::Current(sync) => request_json(sync, value),
            ProxyHandle::Switch(sync) => request_json(sync, value),
        }
    }

    fn view(&self, descriptor: &ProxyDescriptor) -> ProxyView {
        match self {
            ProxyHandle::Current(sync) => view_of(sync, descriptor),
            ProxyHandle::Switch(sync) => view_of(sync, descriptor),
        }
    }

    fn detach(&self) {
        match self {
            ProxyHandle::Current(sync) => sync.detach(),
            ProxyHandle::Switch(sync) => sync.detach(),
        }
    }
}

fn request_json<D: ValueDomain>(sync: &Arc<Synchronizer<D>>, value: &Value) -> Option<bool> {
    let value = sync.domain().from_json(value)?;
    Some(sync.request_value(value))
}

fn view_of<D: ValueDomain>(sync: &Synchronizer<D>, descriptor: &ProxyDescriptor) -> ProxyView {
    let SyncSnapshot {
        observed,
        desired,
        last_call_at,
        last_call_failed,
        converging,
    } = sync.snapshot();

    ProxyView {
        descriptor: descriptor.clone(),
        value: sync.value_json(observed),
        desired: sync.value_json(desired),
        last_actuated_at: last_call_at,
        last_call_failed,
        converging,
    }
}

#[derive(Clone)]
struct ProxyEntry {
    descriptor: ProxyDescriptor,
    handle: ProxyHandle,
}

/// Registry of attached proxies.
///
/// Created by [`ProxyRegistry::attach`] when the integration starts and torn
/// down with [`ProxyRegistry::detach`] (or on drop). Passed explicitly to
/// whatever needs lookups; there is no global instance.
pub struct ProxyRegistry {
    proxies: DashMap<String, ProxyEntry>,
    /// Mirror tasks, aborted on detach
    mirrors: Mutex<Vec<JoinHandle<()>>>,
    updates_tx: broadcast::Sender<ProxyUpdate>,
}

impl ProxyRegistry {
    /// Build every configured proxy, read its initial state and start its mirror.
    pub async fn attach(
        config: &ProxyConfig,
        api: Arc<dyn ChargerApi>,
        bus: &EventBus,
    ) -> Result<Self> {
        config.validate().context("Invalid proxy configuration")?;

        let (updates_tx, _) = broadcast::channel(256);
        let registry = Self {
            proxies: DashMap::new(),
            mirrors: Mutex::new(Vec::new()),
            updates_tx,
        };

        for entity in config.entity_specs() {
            let descriptor = ProxyDescriptor::from_config(&entity);
            let timing = Timing::from(&config.timing.merged(&entity.timing));

            let (handle, mirror) = match entity.kind {
                EntityKind::Current => {
                    let (min, max) = entity.range();
                    let sync = Arc::new(Synchronizer::new(
                        descriptor.id.clone(),
                        entity.source.clone(),
                        CurrentDomain::new(min, max),
                        timing,
                        Arc::clone(&api),
                        registry.updates_tx.clone(),
                    ));
                    let mirror = start_proxy(&sync, bus).await;
                    (ProxyHandle::Current(sync), mirror)
                }
                EntityKind::Switch => {
                    let sync = Arc::new(Synchronizer::new(
                        descriptor.id.clone(),
                        entity.source.clone(),
                        SwitchDomain,
                        timing,
                        Arc::clone(&api),
                        registry.updates_tx.clone(),
                    ));
                    let mirror = start_proxy(&sync, bus).await;
                    (ProxyHandle::Switch(sync), mirror)
                }
            };

            info!(
                proxy_id = %descriptor.id,
                source = %descriptor.source,
                kind = ?descriptor.kind,
                "Proxy attached"
            );

            registry
                .mirrors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(mirror);
            registry
                .proxies
                .insert(descriptor.id.clone(), ProxyEntry { descriptor, handle });
        }

        info!(proxies = registry.proxies.len(), "Proxy registry attached");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get(&self, proxy_id: &str) -> Option<ProxyView> {
        self.proxies
            .get(proxy_id)
            .map(|entry| entry.handle.view(&entry.descriptor))
    }

    /// All proxies, ordered by id
    pub fn list(&self) -> Vec<ProxyView> {
        let mut views: Vec<ProxyView> = self
            .proxies
            .iter()
            .map(|entry| entry.handle.view(&entry.descriptor))
            .collect();
        views.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        views
    }

    /// Request a desired value for a proxy. Only schedules; never waits for
    /// the external API.
    pub fn request(&self, proxy_id: &str, value: &Value) -> Result<RequestOutcome, RequestError> {
        let entry = self
            .proxies
            .get(proxy_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RequestError::UnknownProxy(proxy_id.to_string()))?;

        let scheduled = entry
            .handle
            .request_json(value)
            .ok_or_else(|| RequestError::InvalidValue {
                proxy_id: proxy_id.to_string(),
                kind: entry.descriptor.kind,
                value: value.clone(),
            })?;

        Ok(RequestOutcome {
            scheduled,
            proxy: entry.handle.view(&entry.descriptor),
        })
    }

    /// Subscribe to local state-changed notifications of all proxies
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyUpdate> {
        self.updates_tx.subscribe()
    }

    /// Cancel every convergence loop and mirror.
    pub fn detach(&self) {
        for entry in self.proxies.iter() {
            entry.handle.detach();
        }

        let mut mirrors = self.mirrors.lock().unwrap_or_else(PoisonError::into_inner);
        if !mirrors.is_empty() {
            info!(proxies = self.proxies.len(), "Detaching proxies");
        }
        for mirror in mirrors.drain(..) {
            mirror.abort();
        }
    }
}

impl Drop for ProxyRegistry {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Subscribe, fetch the initial state, then start the mirror.
async fn start_proxy<D: ValueDomain>(sync: &Arc<Synchronizer<D>>, bus: &EventBus) -> JoinHandle<()> {
    let events = bus.subscribe();
    sync.attach().await;
    Mirror::new(Arc::clone(sync), events).spawn()
}
