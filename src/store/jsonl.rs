//! Durable JSON-lines store
//!
//! Appends one JSON line per insert to a file per table under a data
//! directory, and replays those files into an in-memory mirror at startup
//! so queries stay cheap. Append failures are logged and the mirror still
//! gets the row; the process never stops ingesting because the disk does.

use super::{
    ErrorRateBucket, LatencyBucket, MemoryStore, RequestBucket, RequestRow, ServiceCheckRow,
    SloSummary, TimeSeriesStore,
};
use crate::error::StoreError;
use crate::events::{Alert, ErrorSnapshot, LogEntry, ServiceStatus, Timestamp};
use chrono::Duration;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const REQUESTS_FILE: &str = "requests.jsonl";
const LOGS_FILE: &str = "logs.jsonl";
const ALERTS_FILE: &str = "alerts.jsonl";
const CHECKS_FILE: &str = "service_checks.jsonl";
const SNAPSHOTS_FILE: &str = "error_snapshots.jsonl";

struct Files {
    requests: File,
    logs: File,
    alerts: File,
    checks: File,
    snapshots: File,
}

/// Durable time-series store backed by append-only JSON lines
pub struct JsonlStore {
    dir: PathBuf,
    mirror: MemoryStore,
    files: Mutex<Files>,
}

impl JsonlStore {
    /// Open (or create) the store under `dir`, replaying existing rows
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the directory or its files cannot be
    /// created. Malformed lines in existing files are skipped with a
    /// warning rather than failing the whole startup.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let mirror = MemoryStore::new();
        let mut replayed = 0usize;
        replayed += replay::<RequestRow>(&dir.join(REQUESTS_FILE), |row| {
            mirror.insert_request(&row.endpoint, row.status, row.duration_ms, row.ts);
        });
        replayed += replay::<LogEntry>(&dir.join(LOGS_FILE), |entry| {
            mirror.insert_log(&entry);
        });
        replayed += replay::<Alert>(&dir.join(ALERTS_FILE), |alert| {
            mirror.insert_alert(&alert);
        });
        replayed += replay::<ServiceCheckRow>(&dir.join(CHECKS_FILE), |row| {
            mirror.insert_service_check(&row.service, row.status, row.response_ms, row.ts);
        });
        replayed += replay::<ErrorSnapshot>(&dir.join(SNAPSHOTS_FILE), |snapshot| {
            mirror.insert_error_snapshot(&snapshot);
        });
        if replayed > 0 {
            info!("replayed {} rows from {}", replayed, dir.display());
        }

        let open_append = |name: &str| -> Result<File, StoreError> {
            Ok(OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))?)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            mirror,
            files: Mutex::new(Files {
                requests: open_append(REQUESTS_FILE)?,
                logs: open_append(LOGS_FILE)?,
                alerts: open_append(ALERTS_FILE)?,
                checks: open_append(CHECKS_FILE)?,
                snapshots: open_append(SNAPSHOTS_FILE)?,
            }),
        })
    }

    /// Directory the store writes under
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, pick: fn(&mut Files) -> &mut File, row: &T) {
        let line = match serde_json::to_string(row) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to serialize store row: {}", e);
                return;
            }
        };
        let mut files = self.files.lock().unwrap();
        let file = pick(&mut files);
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("failed to append store row: {}", e);
        }
    }
}

/// Replay one table file into the mirror, returning the row count
fn replay<T: DeserializeOwned>(path: &Path, mut apply: impl FnMut(T)) -> usize {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return 0,
    };
    let mut count = 0usize;
    // Rows are appended newest-last; replay in file order so the mirror's
    // newest-first rings end up correct.
    let mut rows: Vec<T> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stopping replay of {}: {}", path.display(), e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("skipping malformed row in {}: {}", path.display(), e),
        }
    }
    for row in rows {
        apply(row);
        count += 1;
    }
    count
}

impl TimeSeriesStore for JsonlStore {
    fn insert_request(&self, endpoint: &str, status: u16, duration_ms: u64, ts: Timestamp) {
        let row = RequestRow {
            endpoint: endpoint.to_string(),
            status,
            duration_ms,
            ts,
        };
        self.append(|f| &mut f.requests, &row);
        self.mirror.insert_request(endpoint, status, duration_ms, ts);
    }

    fn insert_log(&self, entry: &LogEntry) {
        self.append(|f| &mut f.logs, entry);
        self.mirror.insert_log(entry);
    }

    fn insert_alert(&self, alert: &Alert) {
        self.append(|f| &mut f.alerts, alert);
        self.mirror.insert_alert(alert);
    }

    fn insert_service_check(
        &self,
        service: &str,
        status: ServiceStatus,
        response_ms: u64,
        ts: Timestamp,
    ) {
        let row = ServiceCheckRow {
            service: service.to_string(),
            status,
            response_ms,
            ts,
        };
        self.append(|f| &mut f.checks, &row);
        self.mirror.insert_service_check(service, status, response_ms, ts);
    }

    fn insert_error_snapshot(&self, snapshot: &ErrorSnapshot) {
        let mut redacted = snapshot.clone();
        redacted.request_headers = super::redact_headers(&snapshot.request_headers);
        self.append(|f| &mut f.snapshots, &redacted);
        self.mirror.insert_error_snapshot(snapshot);
    }

    fn latency_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<LatencyBucket> {
        self.mirror.latency_series(endpoint, window, bucket)
    }

    fn error_rate_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<ErrorRateBucket> {
        self.mirror.error_rate_series(endpoint, window, bucket)
    }

    fn request_series(
        &self,
        endpoint: &str,
        window: Duration,
        bucket: Duration,
    ) -> Vec<RequestBucket> {
        self.mirror.request_series(endpoint, window, bucket)
    }

    fn slo_summary(
        &self,
        endpoint: &str,
        window: Duration,
        availability_target_pct: f64,
        latency_p95_target_ms: u64,
    ) -> SloSummary {
        self.mirror
            .slo_summary(endpoint, window, availability_target_pct, latency_p95_target_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_insert_and_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        let now = Utc::now();
        store.insert_request("/api/users", 200, 120, now);
        store.insert_request("/api/users", 500, 340, now);

        let series = store.error_rate_series(
            "/api/users",
            Duration::hours(1),
            Duration::minutes(60),
        );
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].total, 2);
        assert_eq!(series[0].errors, 1);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.insert_request("/api/orders", 200, 80, now);
            store.insert_request("/api/orders", 503, 900, now);
        }

        let reopened = JsonlStore::open(dir.path()).unwrap();
        let summary = reopened.slo_summary("/api/orders", Duration::hours(1), 99.9, 400);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.errors, 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.insert_request("/api/users", 200, 100, now);
        }

        // Corrupt the file with a partial line
        let path = dir.path().join(REQUESTS_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ not json").unwrap();

        let reopened = JsonlStore::open(dir.path()).unwrap();
        let series = reopened.request_series(
            "/api/users",
            Duration::hours(1),
            Duration::minutes(60),
        );
        assert_eq!(series[0].count, 1);
    }

    #[test]
    fn test_snapshot_file_is_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        let mut headers = std::collections::HashMap::new();
        headers.insert("x-api-key".to_string(), "key-123".to_string());
        let snapshot = ErrorSnapshot {
            id: "s-1".to_string(),
            source: "synthetics".to_string(),
            endpoint: "https://example.com".to_string(),
            method: "GET".to_string(),
            status: 503,
            request_headers: headers,
            request_body: None,
            response_snippet: String::new(),
            trace_id: None,
            timestamp: Utc::now(),
        };
        store.insert_error_snapshot(&snapshot);

        let contents = std::fs::read_to_string(dir.path().join(SNAPSHOTS_FILE)).unwrap();
        assert!(contents.contains("***"));
        assert!(!contents.contains("key-123"));
    }
}
