//! Time-series persistence
//!
//! The aggregator and scheduler never talk to a database directly: they
//! publish events, and the `Recorder` feeds whichever `TimeSeriesStore`
//! strategy was selected at startup. Two strategies ship here: a bounded
//! in-memory store and a durable JSON-lines store that replays into a
//! memory mirror. Insert failures are recorded and logged, never raised
//! back to producers.

use crate::events::{Alert, ErrorSnapshot, LogEntry, ServiceStatus, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// In-memory bounded store
pub mod memory;

/// Durable JSON-lines store
pub mod jsonl;

/// Bus subscriber that writes events into a store
pub mod recorder;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use recorder::Recorder;

/// One persisted request observation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestRow {
    pub endpoint: String,
    pub status: u16,
    pub duration_ms: u64,
    pub ts: Timestamp,
}

/// One persisted service check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCheckRow {
    pub service: String,
    pub status: ServiceStatus,
    pub response_ms: u64,
    pub ts: Timestamp,
}

/// One bucket of the latency percentile series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatencyBucket {
    /// Bucket start, epoch milliseconds
    pub ts: i64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub count: usize,
}

/// One bucket of the error-rate series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRateBucket {
    pub ts: i64,
    pub total: usize,
    pub errors: usize,
    /// Percentage with 0.1 precision
    pub rate: f64,
}

/// One bucket of the request-volume series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestBucket {
    pub ts: i64,
    pub count: usize,
}

/// Latency portion of an SLO summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SloLatency {
    pub p95: u64,
    pub p99: u64,
    pub target_p95_ms: u64,
    pub compliant: bool,
}

/// Availability and latency compliance over a window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SloSummary {
    pub endpoint: String,
    pub total: usize,
    pub errors: usize,
    pub availability_pct: f64,
    pub availability_target_pct: f64,
    pub error_budget_remaining_pct: f64,
    pub error_budget_used_pct: f64,
    pub latency: SloLatency,
}

/// Strategy interface over the persistence backend
///
/// The durable and in-memory implementations are interchangeable; callers
/// must stay agnostic to which one is active.
pub trait TimeSeriesStore: Send + Sync {
    fn insert_request(&self, endpoint: &str, status: u16, duration_ms: u64, ts: Timestamp);
    fn insert_log(&self, entry: &LogEntry);
    fn insert_alert(&self, alert: &Alert);
    fn insert_service_check(
        &self,
        service: &str,
        status: ServiceStatus,
        response_ms: u64,
        ts: Timestamp,
    );
    fn insert_error_snapshot(&self, snapshot: &ErrorSnapshot);

    /// Bucketed p50/p95/p99 latency for one endpoint over a trailing window
    fn latency_series(&self, endpoint: &str, window: Duration, bucket: Duration)
        -> Vec<LatencyBucket>;

    /// Bucketed error counts and rate for one endpoint
    fn error_rate_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<ErrorRateBucket>;

    /// Bucketed request volume for one endpoint
    fn request_series(&self, endpoint: &str, window: Duration, bucket: Duration)
        -> Vec<RequestBucket>;

    /// Availability, error budget and latency compliance over a window
    fn slo_summary(
        &self,
        endpoint: &str,
        window: Duration,
        availability_target_pct: f64,
        latency_p95_target_ms: u64,
    ) -> SloSummary;
}

/// Percentile of a sorted slice by linear interpolation, rounded
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = idx - lo as f64;
    (sorted[lo] as f64 * (1.0 - weight) + sorted[hi] as f64 * weight).round() as u64
}

/// Start of the bucket containing `ts`, epoch milliseconds
pub(crate) fn bucket_key(ts: Timestamp, bucket_ms: i64) -> i64 {
    ts.timestamp_millis() / bucket_ms * bucket_ms
}

/// Strip credential headers before a snapshot is persisted
pub(crate) fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            let redacted = matches!(key.to_lowercase().as_str(), "authorization" | "x-api-key");
            (
                key.clone(),
                if redacted {
                    "***".to_string()
                } else {
                    value.clone()
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_percentile_interpolates() {
        let sorted = vec![100, 200, 300, 400, 500];
        assert_eq!(percentile(&sorted, 50.0), 300);
        assert_eq!(percentile(&sorted, 0.0), 100);
        assert_eq!(percentile(&sorted, 100.0), 500);
        // 95th of five points sits between the last two
        assert_eq!(percentile(&sorted, 95.0), 480);
    }

    #[test]
    fn test_percentile_edge_cases() {
        assert_eq!(percentile(&[], 95.0), 0);
        assert_eq!(percentile(&[42], 50.0), 42);
        assert_eq!(percentile(&[42], 99.0), 42);
    }

    #[test]
    fn test_bucket_key_floors_to_bucket_start() {
        let ts = Utc::now();
        let bucket_ms = 60_000i64;
        let key = bucket_key(ts, bucket_ms);
        assert_eq!(key % bucket_ms, 0);
        assert!(key <= ts.timestamp_millis());
        assert!(ts.timestamp_millis() - key < bucket_ms);
    }

    #[test]
    fn test_redact_headers() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        headers.insert("x-api-key".to_string(), "key-123".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());

        let redacted = redact_headers(&headers);
        assert_eq!(redacted["Authorization"], "***");
        assert_eq!(redacted["x-api-key"], "***");
        assert_eq!(redacted["accept"], "application/json");
    }
}
