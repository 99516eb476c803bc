/// Error types for the monitoring core
pub mod error;

/// Core entity types and bus events
pub mod events;

/// Process-wide event bus
pub mod bus;

/// Metrics aggregator and the live snapshot
pub mod aggregator;

/// Alert de-duplication, threshold engine and notification channels
pub mod alerts;

/// Synthetic probe engine
pub mod synthetics;

/// Time-series persistence strategies
pub mod store;

/// Realtime fan-out to streaming clients
pub mod broadcaster;

/// Host resource telemetry
pub mod resources;

/// Settings store
pub mod settings;

/// Synthetic traffic generator
pub mod simulator;

// Re-export commonly used types
pub use error::{NotifyError, ProbeError, SettingsError, StoreError};
