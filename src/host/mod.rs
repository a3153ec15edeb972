//! External host boundary.
//!
//! The proxies never talk to a charger directly. Everything they need from the
//! outside world goes through [`ChargerApi`]: reading an entity's current state
//! and issuing the rate-limited commands that change it.

mod home_assistant;
mod simulated;

pub use home_assistant::HomeAssistantClient;
pub use simulated::{RecordedCall, SimulatedHost};

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Rate-limited command API of the external host.
///
/// Implementations must be cheap to share (`Arc<dyn ChargerApi>`); every
/// proxy holds a handle.
#[async_trait]
pub trait ChargerApi: Send + Sync {
    /// Reads the raw current state of `source`.
    ///
    /// Returns `Ok(None)` when the host does not know the entity or reports
    /// no state.
    async fn current_state(&self, source: &str) -> Result<Option<String>>;

    /// Sets a numeric entity to `value`.
    async fn set_value(&self, source: &str, value: f64) -> Result<()>;

    /// Switches a boolean entity on.
    async fn turn_on(&self, source: &str) -> Result<()>;

    /// Switches a boolean entity off.
    async fn turn_off(&self, source: &str) -> Result<()>;
}

/// A single actuator call
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    SetValue(f64),
    TurnOn,
    TurnOff,
}

impl Command {
    /// Issue this command against `source`
    pub async fn dispatch(self, api: &dyn ChargerApi, source: &str) -> Result<()> {
        match self {
            Command::SetValue(value) => api.set_value(source, value).await,
            Command::TurnOn => api.turn_on(source).await,
            Command::TurnOff => api.turn_off(source).await,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetValue(value) => write!(f, "set_value({})", value),
            Command::TurnOn => write!(f, "turn_on"),
            Command::TurnOff => write!(f, "turn_off"),
        }
    }
}
