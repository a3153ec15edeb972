// Proxy synchronization: value domains, cadence policy, convergence loop, mirror

mod cadence;
mod domain;
mod mirror;
mod synchronizer;

pub use cadence::{LastCall, Step, Timing};
pub use domain::{CurrentDomain, Delta, SwitchDomain, ValueDomain};
pub use mirror::Mirror;
pub use synchronizer::{SyncSnapshot, Synchronizer};
