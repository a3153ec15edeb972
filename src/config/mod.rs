mod entity;
mod validation;

pub use entity::{EntityConfig, EntityKind, TimingOverrides, VehicleConfig};
pub use validation::ConfigError;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Complete charge-proxy configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Explicitly listed proxy entities
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    /// Vehicles; each expands to a charging current and a charging switch proxy
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
}

/// Cadence of the convergence loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum time between two rate-limited actuator calls (seconds)
    #[serde(default = "default_min_update_interval")]
    pub min_update_interval_secs: u64,
    /// Re-evaluation interval of the fast path (seconds)
    #[serde(default = "default_fast_update_interval")]
    pub fast_update_interval_secs: u64,
    /// Smallest numeric change worth an actuator call
    #[serde(default = "default_min_actionable_delta")]
    pub min_actionable_delta: f64,
    /// Numeric change at or above which the fast path is taken
    #[serde(default = "default_fast_update_threshold")]
    pub fast_update_threshold: f64,
    #[serde(default)]
    pub fast_path: FastPathMode,
}

/// What the fast path does once its wait has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FastPathMode {
    /// Keep re-checking every fast interval; only an observed change narrows the delta
    #[default]
    Observe,
    /// Call the actuator once the request has been stable for one fast interval
    Act,
}

fn default_min_update_interval() -> u64 {
    60
}

fn default_fast_update_interval() -> u64 {
    10
}

fn default_min_actionable_delta() -> f64 {
    1.0
}

fn default_fast_update_threshold() -> f64 {
    4.0
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_update_interval_secs: default_min_update_interval(),
            fast_update_interval_secs: default_fast_update_interval(),
            min_actionable_delta: default_min_actionable_delta(),
            fast_update_threshold: default_fast_update_threshold(),
            fast_path: FastPathMode::default(),
        }
    }
}

impl TimingConfig {
    /// Apply per-entity overrides on top of the global timing
    pub fn merged(&self, overrides: &TimingOverrides) -> TimingConfig {
        TimingConfig {
            min_update_interval_secs: overrides
                .min_update_interval_secs
                .unwrap_or(self.min_update_interval_secs),
            fast_update_interval_secs: overrides
                .fast_update_interval_secs
                .unwrap_or(self.fast_update_interval_secs),
            min_actionable_delta: overrides
                .min_actionable_delta
                .unwrap_or(self.min_actionable_delta),
            fast_update_threshold: overrides
                .fast_update_threshold
                .unwrap_or(self.fast_update_threshold),
            fast_path: overrides.fast_path.unwrap_or(self.fast_path),
        }
    }
}

/// Which external host the proxies talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    #[default]
    HomeAssistant,
    /// In-memory host, for dry runs without a real charger
    Simulated,
}

/// External host connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub kind: HostKind,
    #[serde(default = "default_host_url")]
    pub url: String,
    /// Long-lived access token
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            kind: HostKind::default(),
            url: default_host_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:3100".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl ProxyConfig {
    /// Override selected settings from env vars.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CHARGE_PROXY_HOST_URL") {
            if !v.is_empty() {
                self.host.url = v;
            }
        }
        if let Ok(v) = std::env::var("CHARGE_PROXY_HA_TOKEN") {
            if !v.is_empty() {
                self.host.token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CHARGE_PROXY_BIND") {
            if !v.is_empty() {
                self.server.bind = v;
            }
        }
    }

    /// All proxy entities: explicit entries first, then expanded vehicles
    pub fn entity_specs(&self) -> Vec<EntityConfig> {
        let mut specs = self.entities.clone();
        for vehicle in &self.vehicles {
            specs.extend(vehicle.expand());
        }
        specs
    }

    /// Check the configuration for values the proxies cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ProxyConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: ProxyConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config '{}'", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.timing.min_update_interval_secs, 60);
        assert_eq!(config.timing.fast_update_interval_secs, 10);
        assert_eq!(config.timing.min_actionable_delta, 1.0);
        assert_eq!(config.timing.fast_update_threshold, 4.0);
        assert_eq!(config.timing.fast_path, FastPathMode::Observe);
        assert_eq!(config.host.kind, HostKind::HomeAssistant);
        assert_eq!(config.server.bind, "0.0.0.0:3100");
        assert!(config.entity_specs().is_empty());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [timing]
            min_update_interval_secs = 120
            fast_update_interval_secs = 5
            fast_path = "act"

            [host]
            kind = "simulated"
            url = "http://ha.local:8123"

            [server]
            bind = "127.0.0.1:9000"

            [[entities]]
            name = "blacky"
            source = "number.blacky_maximaler_ac_ladestrom"
            kind = "current"
            max = 32

            [[entities]]
            name = "blacky"
            source = "switch.blacky_laden"
            kind = "switch"
            timing = { min_update_interval_secs = 30 }
        "#;

        let config: ProxyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.timing.min_update_interval_secs, 120);
        assert_eq!(config.timing.fast_update_interval_secs, 5);
        assert_eq!(config.timing.fast_path, FastPathMode::Act);
        // Unset timing fields keep their defaults
        assert_eq!(config.timing.fast_update_threshold, 4.0);
        assert_eq!(config.host.kind, HostKind::Simulated);
        assert_eq!(config.host.url, "http://ha.local:8123");
        assert_eq!(config.server.bind, "127.0.0.1:9000");

        assert_eq!(config.entities.len(), 2);
        assert_eq!(config.entities[0].kind, EntityKind::Current);
        assert_eq!(config.entities[0].range(), (1.0, 32.0));
        assert_eq!(
            config.entities[1].timing.min_update_interval_secs,
            Some(30)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vehicle_expansion() {
        let toml = r#"
            [[vehicles]]
            name = "tessy"
            charging_current_entity = "number.tessy_maximaler_ac_ladestrom"
            charging_switch_entity = "switch.tessy_laden"
            device_id = "abc123"
        "#;

        let config: ProxyConfig = toml::from_str(toml).unwrap();
        let specs = config.entity_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].kind, EntityKind::Current);
        assert_eq!(specs[0].source, "number.tessy_maximaler_ac_ladestrom");
        assert_eq!(specs[1].kind, EntityKind::Switch);
        assert_eq!(specs[1].source, "switch.tessy_laden");
        assert_eq!(specs[1].device_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_timing_overrides_merge() {
        let global = TimingConfig::default();
        let overrides = TimingOverrides {
            fast_update_interval_secs: Some(3),
            fast_path: Some(FastPathMode::Act),
            ..Default::default()
        };

        let merged = global.merged(&overrides);
        assert_eq!(merged.fast_update_interval_secs, 3);
        assert_eq!(merged.fast_path, FastPathMode::Act);
        assert_eq!(merged.min_update_interval_secs, 60);
        assert_eq!(merged.fast_update_threshold, 4.0);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[entities]]
            name = "blacky"
            source = "number.blacky_maximaler_ac_ladestrom"
            kind = "current"
            "#
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.entities.len(), 1);
        assert_eq!(config.entities[0].name, "blacky");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/charge-proxy.toml");
        assert!(result.is_err());
    }
}
