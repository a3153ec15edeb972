use super::FastPathMode;
use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_MIN_CURRENT: f64 = 1.0;
pub(crate) const DEFAULT_MAX_CURRENT: f64 = 16.0;

/// Value domain of a proxied entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Numeric charging current setting (amperes)
    Current,
    /// Boolean charging on/off switch
    Switch,
}

impl EntityKind {
    fn label(&self) -> &'static str {
        match self {
            EntityKind::Current => "charging_current",
            EntityKind::Switch => "charging_switch",
        }
    }
}

/// Per-entity timing overrides; unset fields fall back to `[timing]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingOverrides {
    pub min_update_interval_secs: Option<u64>,
    pub fast_update_interval_secs: Option<u64>,
    pub min_actionable_delta: Option<f64>,
    pub fast_update_threshold: Option<f64>,
    pub fast_path: Option<FastPathMode>,
}

/// One proxied external entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Vehicle name (e.g., "blacky")
    pub name: String,
    /// Entity id of the external entity (e.g., "switch.blacky_laden")
    pub source: String,
    pub kind: EntityKind,
    /// Lower bound of the charging current (current only)
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound of the charging current (current only)
    #[serde(default)]
    pub max: Option<f64>,
    /// Device the source entity belongs to, used for the proxy id
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub timing: TimingOverrides,
}

impl EntityConfig {
    /// Clamping range `(min, max)`
    pub fn range(&self) -> (f64, f64) {
        (
            self.min.unwrap_or(DEFAULT_MIN_CURRENT),
            self.max.unwrap_or(DEFAULT_MAX_CURRENT),
        )
    }

    /// Stable proxy identifier: `{device_id|source}_{name}_{kind}_proxy`
    pub fn proxy_id(&self) -> String {
        let owner = self.device_id.as_deref().unwrap_or(&self.source);
        format!("{}_{}_{}_proxy", owner, self.name, self.kind.label())
    }

    /// Human readable name, e.g. "Blacky Charging Current Proxy"
    pub fn display_name(&self) -> String {
        let suffix = match self.kind {
            EntityKind::Current => "Charging Current Proxy",
            EntityKind::Switch => "Charging Switch Proxy",
        };
        format!("{} {}", capitalize(&self.name), suffix)
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

/// A vehicle with one charging current and one charging switch entity
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    pub name: String,
    pub charging_current_entity: String,
    pub charging_switch_entity: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl VehicleConfig {
    pub fn expand(&self) -> [EntityConfig; 2] {
        [
            EntityConfig {
                name: self.name.clone(),
                source: self.charging_current_entity.clone(),
                kind: EntityKind::Current,
                min: self.min,
                max: self.max,
                device_id: self.device_id.clone(),
                timing: TimingOverrides::default(),
            },
            EntityConfig {
                name: self.name.clone(),
                source: self.charging_switch_entity.clone(),
                kind: EntityKind::Switch,
                min: None,
                max: None,
                device_id: self.device_id.clone(),
                timing: TimingOverrides::default(),
            },
        ]
    }
}
