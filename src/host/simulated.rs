//! In-memory host for dry runs and tests.
//!
//! Behaves like a cooperative charger: every successful command changes the
//! stored state and pushes a [`SourceStateChanged`] onto the bus, the way the
//! real host reports the device change back.

use super::{ChargerApi, Command};
use crate::event::{EventBus, SourceStateChanged};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// One actuator call received by the simulated host
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub source: String,
    pub command: Command,
    /// When the call started
    pub at: Instant,
    pub succeeded: bool,
}

pub struct SimulatedHost {
    states: DashMap<String, String>,
    bus: EventBus,
    calls: Mutex<Vec<RecordedCall>>,
    failing: AtomicBool,
    /// How long each command takes before the device changes
    latency: Duration,
}

impl SimulatedHost {
    pub fn new(bus: EventBus) -> Self {
        Self {
            states: DashMap::new(),
            bus,
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Change an entity's state out of band and push the change.
    pub fn set_state(&self, source: &str, state: Option<&str>) {
        self.set_state_silently(source, state);
        self.bus.publish(SourceStateChanged::new(source, state));
    }

    /// Change an entity's state without pushing a notification.
    pub fn set_state_silently(&self, source: &str, state: Option<&str>) {
        match state {
            Some(state) => {
                self.states.insert(source.to_string(), state.to_string());
            }
            None => {
                self.states.remove(source);
            }
        }
    }

    pub fn state(&self, source: &str) -> Option<String> {
        self.states.get(source).map(|s| s.clone())
    }

    /// Make every following command fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All calls received so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn apply(&self, source: &str, command: Command) -> Result<()> {
        let succeeded = !self.failing.load(Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                source: source.to_string(),
                command,
                at: Instant::now(),
                succeeded,
            });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if !succeeded {
            anyhow::bail!("simulated host rejected {} for '{}'", command, source);
        }

        let state = match command {
            Command::SetValue(value) => value.to_string(),
            Command::TurnOn => "on".to_string(),
            Command::TurnOff => "off".to_string(),
        };
        info!(source = %source, state = %state, "Simulated device changed");
        self.set_state(source, Some(&state));
        Ok(())
    }
}

#[async_trait]
impl ChargerApi for SimulatedHost {
    async fn current_state(&self, source: &str) -> Result<Option<String>> {
        Ok(self.state(source))
    }

    async fn set_value(&self, source: &str, value: f64) -> Result<()> {
        self.apply(source, Command::SetValue(value)).await
    }

    async fn turn_on(&self, source: &str) -> Result<()> {
        self.apply(source, Command::TurnOn).await
    }

    async fn turn_off(&self, source: &str) -> Result<()> {
        self.apply(source, Command::TurnOff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_updates_state_and_pushes() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let host = SimulatedHost::new(bus);

        host.set_value("number.a", 16.0).await.unwrap();

        assert_eq!(host.state("number.a").as_deref(), Some("16"));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.source, "number.a");
        assert_eq!(event.new_state.as_deref(), Some("16"));

        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, Command::SetValue(16.0));
        assert!(calls[0].succeeded);
    }

    #[tokio::test]
    async fn test_failing_host_records_and_rejects() {
        let bus = EventBus::new();
        let host = SimulatedHost::new(bus);
        host.set_state_silently("switch.a", Some("off"));
        host.set_failing(true);

        assert!(host.turn_on("switch.a").await.is_err());
        assert_eq!(host.state("switch.a").as_deref(), Some("off"));
        assert!(!host.calls()[0].succeeded);
    }

    #[tokio::test]
    async fn test_silent_state_change_does_not_push() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let host = SimulatedHost::new(bus);

        host.set_state_silently("switch.a", Some("on"));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            host.current_state("switch.a").await.unwrap().as_deref(),
            Some("on")
        );

        host.set_state_silently("switch.a", None);
        assert_eq!(host.current_state("switch.a").await.unwrap(), None);
    }
}
