/// Root aggregate data model
pub mod snapshot;

/// Metrics aggregator with ingestion operations
pub mod metrics_aggregator;

pub use metrics_aggregator::{AggregatorConfig, AlertAction, MetricsAggregator};
pub use snapshot::{
    ConnectionStats, CpuMetrics, DatabaseMetrics, EndpointMetrics, MemoryMetrics, MetricSnapshot,
    QueryStats, ResourceMetrics, Stats, TimePoint,
};
