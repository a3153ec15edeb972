use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod bus;

pub use bus::EventBus;

/// States the host reports while an entity has no real value.
const UNRESOLVED_STATES: [&str; 2] = ["unavailable", "unknown"];

/// SourceStateChanged is the push notification for an external entity.
///
/// Delivered by the host whenever the external entity's state changes.
/// `new_state` is `None` when the entity was removed or reported no state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceStateChanged {
    /// Entity id of the external entity (e.g., "number.blacky_maximaler_ac_ladestrom")
    #[serde(alias = "entity_id")]
    pub source: String,

    /// Raw state string as reported by the host
    #[serde(default)]
    pub new_state: Option<String>,
}

impl SourceStateChanged {
    pub fn new(source: impl Into<String>, new_state: Option<&str>) -> Self {
        Self {
            source: source.into(),
            new_state: new_state.map(str::to_string),
        }
    }
}

/// Map host placeholder states ("unavailable", "unknown", empty) to `None`.
pub fn resolve_state(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty() && !UNRESOLVED_STATES.contains(s))
}

/// What caused a proxy's observed value to change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// Initial fetch when the proxy was attached
    Attach,
    /// Push notification from the host
    Mirror,
    /// Optimistic update after a successful actuator call
    Actuator,
    /// State re-read from the host
    Resync,
}

/// Local state-changed notification broadcast to proxy observers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyUpdate {
    pub proxy_id: String,
    pub source: String,
    pub old_value: Value,
    pub new_value: Value,
    pub origin: UpdateOrigin,
    pub timestamp: DateTime<Utc>,
}
