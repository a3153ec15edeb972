use crate::event::resolve_state;
use crate::host::Command;
use serde_json::{json, Value};
use std::fmt::Debug;

/// Distance between a desired and an observed value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    /// Numeric distance
    Magnitude(f64),
    /// The values differ but have no measurable distance (boolean, or an
    /// unknown observed value)
    Differs,
}

/// Value domain of a synchronized entity.
///
/// Everything the convergence loop needs to know about values lives here:
/// how to read them from the host, how to normalize consumer requests, how
/// far apart two values are, and which command moves the device.
pub trait ValueDomain: Send + Sync + 'static {
    type Value: Copy + PartialEq + Debug + Send + Sync + 'static;

    /// Parses a raw host state; `None` means unknown.
    fn parse(&self, raw: Option<&str>) -> Option<Self::Value>;

    /// Normalizes a requested or observed value into the domain; `None` if
    /// it has no place in it.
    fn normalize(&self, value: Self::Value) -> Option<Self::Value>;

    /// Distance from `observed` to `desired`. Only called when they differ.
    fn delta(&self, desired: Self::Value, observed: Option<Self::Value>) -> Delta;

    /// Command that drives the device to `value`.
    fn command(&self, value: Self::Value) -> Command;

    fn to_json(&self, value: Self::Value) -> Value;

    fn from_json(&self, value: &Value) -> Option<Self::Value>;
}

/// Charging current in amperes, clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentDomain {
    pub min: f64,
    pub max: f64,
}

impl CurrentDomain {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl ValueDomain for CurrentDomain {
    type Value = f64;

    fn parse(&self, raw: Option<&str>) -> Option<f64> {
        resolve_state(raw)?
            .parse::<f64>()
            .ok()
            .and_then(|v| self.normalize(v))
    }

    fn normalize(&self, value: f64) -> Option<f64> {
        value.is_finite().then(|| value.clamp(self.min, self.max))
    }

    fn delta(&self, desired: f64, observed: Option<f64>) -> Delta {
        match observed {
            Some(observed) => Delta::Magnitude((desired - observed).abs()),
            None => Delta::Differs,
        }
    }

    fn command(&self, value: f64) -> Command {
        Command::SetValue(value)
    }

    fn to_json(&self, value: f64) -> Value {
        json!(value)
    }

    fn from_json(&self, value: &Value) -> Option<f64> {
        value.as_f64().filter(|v| v.is_finite())
    }
}

/// Charging on/off switch. `"on"` is true, any other state false.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SwitchDomain;

impl ValueDomain for SwitchDomain {
    type Value = bool;

    fn parse(&self, raw: Option<&str>) -> Option<bool> {
        resolve_state(raw).map(|s| s == "on")
    }

    fn normalize(&self, value: bool) -> Option<bool> {
        Some(value)
    }

    fn delta(&self, _desired: bool, _observed: Option<bool>) -> Delta {
        Delta::Differs
    }

    fn command(&self, value: bool) -> Command {
        if value {
            Command::TurnOn
        } else {
            Command::TurnOff
        }
    }

    fn to_json(&self, value: bool) -> Value {
        Value::Bool(value)
    }

    fn from_json(&self, value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s == "on" => Some(true),
            Value::String(s) if s == "off" => Some(false),
            _ => None,
        }
    }
}
