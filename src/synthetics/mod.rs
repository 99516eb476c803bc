/// Monitor definitions and probe results
pub mod monitor;

/// HTTP probe execution
pub mod prober;

/// Per-monitor scheduling with jitter and backoff
pub mod scheduler;

pub use monitor::{Monitor, ProbeResult};
pub use prober::Prober;
pub use scheduler::{Synthetics, SyntheticsConfig, SyntheticsStatus};
