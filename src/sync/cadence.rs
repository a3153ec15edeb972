use super::domain::Delta;
use crate::config::{FastPathMode, TimingConfig};
use std::time::Duration;
use tokio::time::Instant;

/// What the convergence loop does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Desired value reached (or none pending): the loop ends
    Stop,
    /// Wait, then evaluate again
    Sleep(Duration),
    /// Call the actuator now
    Actuate,
}

/// Most recent actuator call on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastCall {
    pub at: Instant,
    pub failed: bool,
}

/// Cadence policy of one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub min_update_interval: Duration,
    pub fast_update_interval: Duration,
    pub min_actionable_delta: f64,
    pub fast_update_threshold: f64,
    pub fast_path: FastPathMode,
}

impl From<&TimingConfig> for Timing {
    fn from(config: &TimingConfig) -> Self {
        Self {
            min_update_interval: Duration::from_secs(config.min_update_interval_secs),
            fast_update_interval: Duration::from_secs(config.fast_update_interval_secs),
            min_actionable_delta: config.min_actionable_delta,
            fast_update_threshold: config.fast_update_threshold,
            fast_path: config.fast_path,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl Timing {
    /// Decide the next loop step.
    ///
    /// `delta` is `None` when nothing is pending (no desired value, or it
    /// equals the observed one). `desired_since` is when the current desired
    /// value was requested.
    ///
    /// - large numeric deltas take the fast path: wait one fast interval,
    ///   then act (or keep waiting in `Observe` mode)
    /// - smaller numeric deltas act once the cooldown since the last call has
    ///   elapsed, provided they reach `min_actionable_delta`
    /// - deltas without magnitude (switches, unknown baseline) act once the
    ///   cooldown has elapsed, re-checking at least every fast interval
    pub fn next_step(
        &self,
        delta: Option<Delta>,
        desired_since: Instant,
        last_call: Option<LastCall>,
        now: Instant,
    ) -> Step {
        let Some(delta) = delta else {
            return Step::Stop;
        };

        let cooldown_left = last_call
            .map(|call| (call.at + self.min_update_interval).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        match delta {
            Delta::Magnitude(d) if d >= self.fast_update_threshold => match self.fast_path {
                FastPathMode::Observe => Step::Sleep(self.fast_update_interval),
                FastPathMode::Act => {
                    let settle = (desired_since + self.fast_update_interval)
                        .saturating_duration_since(now);
                    // A failed call falls back to the regular cooldown
                    let spacing = match last_call {
                        Some(call) if call.failed => cooldown_left,
                        Some(call) => (call.at + self.fast_update_interval)
                            .saturating_duration_since(now),
                        None => Duration::ZERO,
                    };
                    let wait = settle.max(spacing);
                    if wait.is_zero() {
                        Step::Actuate
                    } else {
                        Step::Sleep(wait)
                    }
                }
            },
            Delta::Magnitude(d) => {
                if !cooldown_left.is_zero() {
                    Step::Sleep(cooldown_left)
                } else if d >= self.min_actionable_delta {
                    Step::Actuate
                } else {
                    Step::Sleep(self.min_update_interval)
                }
            }
            Delta::Differs => {
                if cooldown_left.is_zero() {
                    Step::Actuate
                } else {
                    Step::Sleep(cooldown_left.min(self.fast_update_interval))
                }
            }
        }
    }
}
