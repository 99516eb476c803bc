/// Alert de-duplication window
pub mod dedup;

/// Periodic threshold evaluation engine
pub mod alert_engine;

/// Outbound notification channels
pub mod notify;

pub use alert_engine::{AlertEngine, Thresholds};
pub use dedup::DedupWindow;
pub use notify::AlertNotifier;
