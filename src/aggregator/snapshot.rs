//! Root aggregate for live metrics
//!
//! `MetricSnapshot` is the single in-memory source of truth served to the
//! dashboard: request statistics, per-endpoint counters, database query
//! stats, service health, alerts, logs and host resource gauges. All
//! mutation goes through `MetricsAggregator`; this module only defines the
//! data shape and its seeded default state.

use crate::events::{Alert, LogEntry, ServiceHealth, ServiceStatus, SlowQuery};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of hour-of-day slots in each endpoint's response-time series
pub const HOUR_SLOTS: usize = 24;

/// One hour-of-day slot of the smoothed response-time series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimePoint {
    /// Hour label, e.g. "07:00"
    pub time: String,
    /// Smoothed response time in milliseconds
    pub value: f64,
}

/// Per-endpoint request counters and response-time series
///
/// The series is keyed by hour of day only; a process running past midnight
/// folds the new day's samples into the same labeled slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointMetrics {
    pub name: String,
    pub requests: u64,
    pub errors: u64,
    pub response_time: Vec<TimePoint>,
}

impl EndpointMetrics {
    /// Create a fresh endpoint record with a zeroed 24-slot series
    pub fn new(name: &str) -> Self {
        let response_time = (0..HOUR_SLOTS)
            .map(|hour| TimePoint {
                time: format!("{:02}:00", hour),
                value: 0.0,
            })
            .collect();
        Self {
            name: name.to_string(),
            requests: 0,
            errors: 0,
            response_time,
        }
    }
}

/// Global request statistics, derived on every ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub total_requests: u64,
    /// Percentage of requests with status >= 400
    pub error_rate: f64,
    /// Mean over all endpoints' hour slots, in milliseconds
    pub avg_response_time: f64,
    pub uptime: f64,
}

/// Database query counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryStats {
    pub total: u64,
    pub slow: u64,
    /// Running mean duration in milliseconds
    pub average: f64,
}

/// Connection pool gauge
///
/// Illustrative values; a production deployment would substitute a real
/// pool snapshot here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStats {
    pub active: u32,
    pub idle: u32,
    pub max: u32,
    pub used_percentage: f64,
}

/// Database metrics: query stats, pool gauge, recent slow queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseMetrics {
    pub queries: QueryStats,
    pub connections: ConnectionStats,
    /// Newest first, capped
    pub slow_queries: VecDeque<SlowQuery>,
}

/// CPU gauge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuMetrics {
    pub current: f64,
    pub peak: f64,
    pub average: f64,
    pub cores: usize,
}

/// Memory gauge, sizes in whole gigabytes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMetrics {
    pub total_gb: u64,
    pub used_gb: u64,
    pub free_gb: u64,
    pub used_percentage: f64,
}

/// Host resource gauges, refreshed from telemetry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMetrics {
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
}

/// The full live aggregate served to the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    pub stats: Stats,
    pub endpoints: Vec<EndpointMetrics>,
    pub database: DatabaseMetrics,
    pub service_health: Vec<ServiceHealth>,
    /// Newest or most recently touched first, capped at 100
    pub alerts: VecDeque<Alert>,
    /// Newest first, capped at 1000
    pub logs: VecDeque<LogEntry>,
    pub resources: ResourceMetrics,
}

/// Endpoints present before any traffic is recorded
const SEED_ENDPOINTS: [&str; 5] = [
    "/api/users",
    "/api/products",
    "/api/orders",
    "/api/auth",
    "/api/payments",
];

/// Services known at startup with their initial classification
const SEED_SERVICES: [(&str, ServiceStatus); 6] = [
    ("User Service", ServiceStatus::Healthy),
    ("Authentication Service", ServiceStatus::Healthy),
    ("Product Service", ServiceStatus::Degraded),
    ("Order Service", ServiceStatus::Healthy),
    ("Payment Service", ServiceStatus::Healthy),
    ("Notification Service", ServiceStatus::Unhealthy),
];

fn seed_uptime(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Healthy => "99.9%",
        ServiceStatus::Degraded => "98.5%",
        ServiceStatus::Unhealthy => "95.2%",
    }
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            stats: Stats {
                total_requests: 0,
                error_rate: 0.0,
                avg_response_time: 0.0,
                uptime: 99.98,
            },
            endpoints: SEED_ENDPOINTS.iter().map(|e| EndpointMetrics::new(e)).collect(),
            database: DatabaseMetrics {
                queries: QueryStats {
                    total: 0,
                    slow: 0,
                    average: 0.0,
                },
                connections: ConnectionStats {
                    active: 0,
                    idle: 0,
                    max: 20,
                    used_percentage: 0.0,
                },
                slow_queries: VecDeque::new(),
            },
            service_health: SEED_SERVICES
                .iter()
                .map(|(name, status)| ServiceHealth {
                    name: name.to_string(),
                    status: *status,
                    response_time_ms: 0,
                    uptime: seed_uptime(*status).to_string(),
                    last_checked: now,
                })
                .collect(),
            alerts: VecDeque::new(),
            logs: VecDeque::new(),
            resources: ResourceMetrics {
                cpu: CpuMetrics {
                    current: 0.0,
                    peak: 0.0,
                    average: 0.0,
                    cores: 0,
                },
                memory: MemoryMetrics {
                    total_gb: 0,
                    used_gb: 0,
                    free_gb: 0,
                    used_percentage: 0.0,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_seeds() {
        let snapshot = MetricSnapshot::default();

        assert_eq!(snapshot.endpoints.len(), 5);
        assert!(snapshot.endpoints.iter().any(|e| e.name == "/api/orders"));
        assert_eq!(snapshot.service_health.len(), 6);
        assert_eq!(snapshot.database.connections.max, 20);
        assert_eq!(snapshot.stats.uptime, 99.98);
        assert!(snapshot.alerts.is_empty());
        assert!(snapshot.logs.is_empty());
    }

    #[test]
    fn test_endpoint_series_has_24_labeled_slots() {
        let endpoint = EndpointMetrics::new("/api/test");

        assert_eq!(endpoint.response_time.len(), HOUR_SLOTS);
        assert_eq!(endpoint.response_time[0].time, "00:00");
        assert_eq!(endpoint.response_time[7].time, "07:00");
        assert_eq!(endpoint.response_time[23].time, "23:00");
        assert!(endpoint.response_time.iter().all(|p| p.value == 0.0));
    }

    #[test]
    fn test_snapshot_serialization_round_trip() {
        let snapshot = MetricSnapshot::default();

        let json = serde_json::to_string(&snapshot).unwrap();
        let deserialized: MetricSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, deserialized);
    }
}
