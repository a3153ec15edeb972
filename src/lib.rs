// Configuration, defaults and env overrides
pub mod config;

// Push notifications and local update events
pub mod event;

// External charger API boundary
pub mod host;

// Convergence scheduling and mirroring
pub mod sync;

// Lifecycle-owned proxy registry
pub mod registry;

// HTTP and WebSocket APIs
pub mod api;
