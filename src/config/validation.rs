use super::{EntityKind, ProxyConfig, TimingConfig};
use std::collections::HashSet;
use std::fmt;

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyName(String),
    EmptySource(String),
    InvalidRange { source: String, min: f64, max: f64 },
    DuplicateProxy(String),
    InvalidInterval(&'static str),
    InvalidThreshold(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyName(source) => {
                write!(f, "entity '{}' has an empty name", source)
            }
            ConfigError::EmptySource(name) => {
                write!(f, "entity '{}' has an empty source", name)
            }
            ConfigError::InvalidRange { source, min, max } => {
                write!(f, "entity '{}' has invalid range [{}, {}]", source, min, max)
            }
            ConfigError::DuplicateProxy(id) => write!(f, "duplicate proxy '{}'", id),
            ConfigError::InvalidInterval(field) => {
                write!(f, "{} must be greater than zero", field)
            }
            ConfigError::InvalidThreshold(field) => {
                write!(f, "{} must be a finite, non-negative number", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validates the global timing, every entity and its effective timing.
///
/// Rules:
/// - names and sources are non-empty
/// - current ranges are finite with `min <= max`
/// - proxy ids are unique
/// - intervals are positive, thresholds finite and non-negative
pub fn validate(config: &ProxyConfig) -> Result<(), ConfigError> {
    validate_timing(&config.timing)?;

    let mut seen = HashSet::new();
    for entity in config.entity_specs() {
        if entity.name.trim().is_empty() {
            return Err(ConfigError::EmptyName(entity.source.clone()));
        }
        if entity.source.trim().is_empty() {
            return Err(ConfigError::EmptySource(entity.name.clone()));
        }
        if entity.kind == EntityKind::Current {
            let (min, max) = entity.range();
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(ConfigError::InvalidRange {
                    source: entity.source.clone(),
                    min,
                    max,
                });
            }
        }
        validate_timing(&config.timing.merged(&entity.timing))?;

        let id = entity.proxy_id();
        if !seen.insert(id.clone()) {
            return Err(ConfigError::DuplicateProxy(id));
        }
    }

    Ok(())
}

fn validate_timing(timing: &TimingConfig) -> Result<(), ConfigError> {
    if timing.min_update_interval_secs == 0 {
        return Err(ConfigError::InvalidInterval("min_update_interval_secs"));
    }
    if timing.fast_update_interval_secs == 0 {
        return Err(ConfigError::InvalidInterval("fast_update_interval_secs"));
    }
    if !is_valid_threshold(timing.min_actionable_delta) {
        return Err(ConfigError::InvalidThreshold("min_actionable_delta"));
    }
    if !is_valid_threshold(timing.fast_update_threshold) {
        return Err(ConfigError::InvalidThreshold("fast_update_threshold"));
    }
    Ok(())
}

fn is_valid_threshold(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
