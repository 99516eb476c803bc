//! Bounded in-memory store
//!
//! Newest-first rings per table. Used directly when no data directory is
//! configured, and as the query mirror inside the durable store.

use super::{
    bucket_key, percentile, redact_headers, ErrorRateBucket, LatencyBucket, RequestBucket,
    RequestRow, ServiceCheckRow, SloLatency, SloSummary, TimeSeriesStore,
};
use crate::events::{Alert, ErrorSnapshot, LogEntry, ServiceStatus, Timestamp};
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Retention caps per table
const MAX_REQUESTS: usize = 50_000;
const MAX_LOGS: usize = 10_000;
const MAX_ALERTS: usize = 10_000;
const MAX_CHECKS: usize = 10_000;
const MAX_SNAPSHOTS: usize = 200;

#[derive(Debug, Default)]
struct Tables {
    requests: VecDeque<RequestRow>,
    logs: VecDeque<LogEntry>,
    alerts: VecDeque<Alert>,
    checks: VecDeque<ServiceCheckRow>,
    snapshots: VecDeque<ErrorSnapshot>,
}

/// Bounded in-memory time-series store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained request rows, for tests and diagnostics
    pub fn request_count(&self) -> usize {
        self.tables.lock().unwrap().requests.len()
    }

    /// Retained error snapshots, newest first
    pub fn error_snapshots(&self) -> Vec<ErrorSnapshot> {
        self.tables
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .cloned()
            .collect()
    }

    fn rows_for(
        &self,
        endpoint: &str,
        window: Duration,
    ) -> Vec<RequestRow> {
        let to = Utc::now();
        let from = to - window;
        self.tables
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.endpoint == endpoint && r.ts >= from && r.ts <= to)
            .cloned()
            .collect()
    }
}

impl TimeSeriesStore for MemoryStore {
    fn insert_request(&self, endpoint: &str, status: u16, duration_ms: u64, ts: Timestamp) {
        let mut tables = self.tables.lock().unwrap();
        tables.requests.push_front(RequestRow {
            endpoint: endpoint.to_string(),
            status,
            duration_ms,
            ts,
        });
        tables.requests.truncate(MAX_REQUESTS);
    }

    fn insert_log(&self, entry: &LogEntry) {
        let mut tables = self.tables.lock().unwrap();
        tables.logs.push_front(entry.clone());
        tables.logs.truncate(MAX_LOGS);
    }

    fn insert_alert(&self, alert: &Alert) {
        let mut tables = self.tables.lock().unwrap();
        tables.alerts.push_front(alert.clone());
        tables.alerts.truncate(MAX_ALERTS);
    }

    fn insert_service_check(
        &self,
        service: &str,
        status: ServiceStatus,
        response_ms: u64,
        ts: Timestamp,
    ) {
        let mut tables = self.tables.lock().unwrap();
        tables.checks.push_front(ServiceCheckRow {
            service: service.to_string(),
            status,
            response_ms,
            ts,
        });
        tables.checks.truncate(MAX_CHECKS);
    }

    fn insert_error_snapshot(&self, snapshot: &ErrorSnapshot) {
        let mut redacted = snapshot.clone();
        redacted.request_headers = redact_headers(&snapshot.request_headers);
        let mut tables = self.tables.lock().unwrap();
        tables.snapshots.push_front(redacted);
        tables.snapshots.truncate(MAX_SNAPSHOTS);
    }

    fn latency_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<LatencyBucket> {
        let bucket_ms = bucket.num_milliseconds().max(1);
        let mut buckets: BTreeMap<i64, Vec<u64>> = BTreeMap::new();
        for row in self.rows_for(endpoint, window) {
            buckets
                .entry(bucket_key(row.ts, bucket_ms))
                .or_default()
                .push(row.duration_ms);
        }
        buckets
            .into_iter()
            .map(|(ts, mut durations)| {
                durations.sort_unstable();
                LatencyBucket {
                    ts,
                    p50: percentile(&durations, 50.0),
                    p95: percentile(&durations, 95.0),
                    p99: percentile(&durations, 99.0),
                    count: durations.len(),
                }
            })
            .collect()
    }

    fn error_rate_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<ErrorRateBucket> {
        let bucket_ms = bucket.num_milliseconds().max(1);
        let mut buckets: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
        for row in self.rows_for(endpoint, window) {
            let entry = buckets.entry(bucket_key(row.ts, bucket_ms)).or_default();
            entry.0 += 1;
            if row.status >= 400 {
                entry.1 += 1;
            }
        }
        buckets
            .into_iter()
            .map(|(ts, (total, errors))| ErrorRateBucket {
                ts,
                total,
                errors,
                rate: if total > 0 {
                    (errors as f64 / total as f64 * 1000.0).round() / 10.0
                } else {
                    0.0
                },
            })
            .collect()
    }

    fn request_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<RequestBucket> {
        let bucket_ms = bucket.num_milliseconds().max(1);
        let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
        for row in self.rows_for(endpoint, window) {
            *buckets.entry(bucket_key(row.ts, bucket_ms)).or_default() += 1;
        }
        buckets
            .into_iter()
            .map(|(ts, count)| RequestBucket { ts, count })
            .collect()
    }

    fn slo_summary(
        &self,
        endpoint: &str,
        window: Duration,
        availability_target_pct: f64,
        latency_p95_target_ms: u64,
    ) -> SloSummary {
        let rows = self.rows_for(endpoint, window);
        let total = rows.len();
        let errors = rows.iter().filter(|r| r.status >= 400).count();
        let availability = if total > 0 {
            (1.0 - errors as f64 / total as f64) * 100.0
        } else {
            100.0
        };

        let mut durations: Vec<u64> = rows.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();
        let p95 = percentile(&durations, 95.0);
        let p99 = percentile(&durations, 99.0);

        let consumed = (100.0 - availability).max(0.0);
        let budget_remaining = (availability_target_pct - consumed).max(0.0);
        let budget_used = if availability_target_pct > 0.0 {
            (consumed / availability_target_pct * 100.0).min(100.0)
        } else {
            0.0
        };

        SloSummary {
            endpoint: endpoint.to_string(),
            total,
            errors,
            availability_pct: availability,
            availability_target_pct,
            error_budget_remaining_pct: budget_remaining,
            error_budget_used_pct: budget_used,
            latency: SloLatency {
                p95,
                p99,
                target_p95_ms: latency_p95_target_ms,
                compliant: p95 <= latency_p95_target_ms,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn insert_requests(store: &MemoryStore, endpoint: &str, rows: &[(u16, u64)]) {
        let now = Utc::now();
        for (status, duration) in rows {
            store.insert_request(endpoint, *status, *duration, now);
        }
    }

    #[test]
    fn test_latency_series_percentiles() {
        let store = MemoryStore::new();
        insert_requests(
            &store,
            "/api/users",
            &[(200, 100), (200, 200), (200, 300), (200, 400), (200, 500)],
        );

        let series = store.latency_series(
            "/api/users",
            Duration::hours(1),
            Duration::minutes(60),
        );
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].count, 5);
        assert_eq!(series[0].p50, 300);
        assert_eq!(series[0].p95, 480);
    }

    #[test]
    fn test_series_filters_by_endpoint() {
        let store = MemoryStore::new();
        insert_requests(&store, "/api/users", &[(200, 100)]);
        insert_requests(&store, "/api/orders", &[(200, 100), (500, 300)]);

        let series = store.request_series(
            "/api/orders",
            Duration::hours(1),
            Duration::minutes(60),
        );
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].count, 2);
    }

    #[test]
    fn test_error_rate_series() {
        let store = MemoryStore::new();
        insert_requests(
            &store,
            "/api/orders",
            &[(200, 50), (200, 50), (500, 50), (404, 50)],
        );

        let series = store.error_rate_series(
            "/api/orders",
            Duration::hours(1),
            Duration::minutes(60),
        );
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].total, 4);
        assert_eq!(series[0].errors, 2);
        assert!((series[0].rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_slo_summary() {
        let store = MemoryStore::new();
        // 100 requests, 1 error, latencies all 100ms
        let rows: Vec<(u16, u64)> = (0..100)
            .map(|i| (if i == 0 { 500 } else { 200 }, 100))
            .collect();
        insert_requests(&store, "/api/users", &rows);

        let summary = store.slo_summary("/api/users", Duration::hours(24), 99.9, 400);
        assert_eq!(summary.total, 100);
        assert_eq!(summary.errors, 1);
        assert!((summary.availability_pct - 99.0).abs() < 1e-9);
        // 1% consumed against a 99.9% target
        assert!((summary.error_budget_remaining_pct - 98.9).abs() < 1e-9);
        assert!(summary.latency.compliant);
        assert_eq!(summary.latency.p95, 100);
    }

    #[test]
    fn test_slo_summary_empty_window() {
        let store = MemoryStore::new();
        let summary = store.slo_summary("/api/none", Duration::hours(24), 99.9, 400);
        assert_eq!(summary.total, 0);
        assert!((summary.availability_pct - 100.0).abs() < 1e-9);
        assert!(summary.latency.compliant);
    }

    #[test]
    fn test_request_cap() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..(MAX_REQUESTS + 10) {
            store.insert_request("/api/users", 200, i as u64, now);
        }
        assert_eq!(store.request_count(), MAX_REQUESTS);
    }

    #[test]
    fn test_snapshot_insert_redacts_credentials() {
        let store = MemoryStore::new();
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer secret".to_string());

        let snapshot = ErrorSnapshot {
            id: "s-1".to_string(),
            source: "synthetics".to_string(),
            endpoint: "https://example.com/health".to_string(),
            method: "GET".to_string(),
            status: 503,
            request_headers: headers,
            request_body: None,
            response_snippet: String::new(),
            trace_id: None,
            timestamp: Utc::now(),
        };
        store.insert_error_snapshot(&snapshot);

        let stored = store.error_snapshots();
        assert_eq!(stored[0].request_headers["authorization"], "***");
    }
}
