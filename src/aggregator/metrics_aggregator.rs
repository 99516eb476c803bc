//! Metrics aggregator: the single writer over the live snapshot
//!
//! Every producer (request instrumentation, query instrumentation, health
//! checks, the probe scheduler, the traffic simulator) funnels through the
//! operations here. Each operation mutates the snapshot synchronously under
//! one lock and then publishes the corresponding events on the bus, so
//! derived fields are never computed from torn reads.

use crate::aggregator::snapshot::{EndpointMetrics, MetricSnapshot};
use crate::alerts::DedupWindow;
use crate::bus::EventBus;
use crate::events::{
    Alert, AlertStatus, AlertType, ApiRequestEvent, ErrorSnapshot, LogEntry, MetricEvent,
    ServiceHealth, ServiceStatus, Timestamp,
};
use crate::resources::ResourceSampler;
use chrono::{Local, Timelike, Utc};
use log::debug;
use rand::Rng;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

/// Maximum number of alerts retained in the snapshot
const MAX_ALERTS: usize = 100;
/// Maximum number of log entries retained in the snapshot
const MAX_LOGS: usize = 1000;
/// Maximum number of slow queries retained for display
const MAX_SLOW_QUERIES: usize = 10;
/// Maximum number of error snapshots kept for trace correlation
const MAX_RECENT_SNAPSHOTS: usize = 50;

/// Query duration above which a query counts as slow, in milliseconds
const SLOW_QUERY_MS: f64 = 100.0;
/// Query duration that additionally raises an alert, in milliseconds
const VERY_SLOW_QUERY_MS: f64 = 500.0;
/// Request duration above which a slow-response warning is raised
const SLOW_REQUEST_MS: u64 = 500;

/// Smoothing update for a rolling series slot: 80% history, 20% new sample
pub(crate) fn ema(previous: f64, sample: f64) -> f64 {
    previous * 0.8 + sample * 0.2
}

/// Operator action on an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Acknowledge,
    Resolve,
}

/// Tunables for the aggregator, sourced from settings
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Cooldown during which an identical alert is silently suppressed
    pub dedup_cooldown: chrono::Duration,
    /// Endpoints whose 404 responses are neither logged nor alerted
    pub ignore_not_found: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            dedup_cooldown: chrono::Duration::seconds(60),
            ignore_not_found: Vec::new(),
        }
    }
}

struct Inner {
    snapshot: MetricSnapshot,
    dedup: DedupWindow,
    recent_snapshots: VecDeque<ErrorSnapshot>,
    ignore_not_found: Vec<String>,
    sampler: ResourceSampler,
}

/// Single source of truth for live metrics
///
/// Cheap to clone; all clones share the same state and bus.
#[derive(Clone)]
pub struct MetricsAggregator {
    inner: Arc<Mutex<Inner>>,
    bus: EventBus,
}

impl MetricsAggregator {
    /// Create an aggregator with the default seeded snapshot
    pub fn new(bus: EventBus, config: AggregatorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                snapshot: MetricSnapshot::default(),
                dedup: DedupWindow::new(config.dedup_cooldown),
                recent_snapshots: VecDeque::new(),
                ignore_not_found: config.ignore_not_found,
                sampler: ResourceSampler::new(),
            })),
            bus,
        }
    }

    /// Record one API request
    ///
    /// Updates totals, the endpoint's counters and hour-slot response-time
    /// series, and the derived error rate and average response time. Error
    /// responses append a log entry and raise alerts: an error alert for
    /// 5xx, a warning for 4xx (404s on the ignore list are skipped), and an
    /// independent slow-response warning when the duration exceeds 500 ms.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, status: u16) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();

            inner.snapshot.stats.total_requests += 1;

            let hour = Local::now().hour() as usize;
            let index = match inner
                .snapshot
                .endpoints
                .iter()
                .position(|e| e.name == endpoint)
            {
                Some(index) => index,
                None => {
                    inner.snapshot.endpoints.push(EndpointMetrics::new(endpoint));
                    inner.snapshot.endpoints.len() - 1
                }
            };
            let ep = &mut inner.snapshot.endpoints[index];
            ep.requests += 1;
            if status >= 400 {
                ep.errors += 1;
            }
            let slot = &mut ep.response_time[hour];
            slot.value = ema(slot.value, duration_ms as f64);
            events.push(MetricEvent::EndpointChanged(ep.clone()));

            // Derived stats are recomputed from the endpoint table so they
            // stay consistent no matter which producer got here first.
            let total_errors: u64 = inner.snapshot.endpoints.iter().map(|e| e.errors).sum();
            let total_requests: u64 = inner.snapshot.endpoints.iter().map(|e| e.requests).sum();
            inner.snapshot.stats.error_rate = if total_requests > 0 {
                total_errors as f64 / total_requests as f64 * 100.0
            } else {
                0.0
            };
            let mut sum = 0.0;
            let mut points = 0usize;
            for e in &inner.snapshot.endpoints {
                for p in &e.response_time {
                    sum += p.value;
                    points += 1;
                }
            }
            inner.snapshot.stats.avg_response_time =
                if points > 0 { sum / points as f64 } else { 0.0 };
            events.push(MetricEvent::StatsChanged(inner.snapshot.stats.clone()));

            events.push(MetricEvent::ApiRequest(ApiRequestEvent {
                endpoint: endpoint.to_string(),
                duration_ms,
                status,
            }));

            let suppressed_not_found = status == 404 && inner.ignored_not_found(endpoint);

            if status >= 400 && !suppressed_not_found {
                inner.add_log(&mut events, endpoint, status, duration_ms, now);
            }

            if status >= 500 {
                inner.raise_alert_at(
                    &mut events,
                    AlertType::Error,
                    format!("Server error on {}", endpoint),
                    "API Gateway",
                    format!("Status code: {}", status),
                    now,
                );
            } else if status >= 400 && !suppressed_not_found {
                inner.raise_alert_at(
                    &mut events,
                    AlertType::Warning,
                    format!("Client error on {}", endpoint),
                    "API Gateway",
                    format!("Status code: {}", status),
                    now,
                );
            }

            if duration_ms > SLOW_REQUEST_MS {
                inner.raise_alert_at(
                    &mut events,
                    AlertType::Warning,
                    format!("Slow response on {}", endpoint),
                    "API Gateway",
                    format!("Response time: {}ms", duration_ms),
                    now,
                );
            }
        }
        self.emit_all(events);
    }

    /// Record one database query
    ///
    /// Maintains the running mean, tracks slow queries (over 100 ms) in a
    /// bounded newest-first list, raises a warning for very slow queries
    /// (over 500 ms) and refreshes the simulated connection-pool gauge.
    pub fn record_database_query(&self, query: &str, duration_ms: f64) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();

            let queries = &mut inner.snapshot.database.queries;
            queries.total += 1;
            let previous_total = queries.average * (queries.total - 1) as f64;
            queries.average = (previous_total + duration_ms) / queries.total as f64;

            if duration_ms > SLOW_QUERY_MS {
                queries.slow += 1;
                let truncated: String = query.chars().take(100).collect();
                inner
                    .snapshot
                    .database
                    .slow_queries
                    .push_front(crate::events::SlowQuery {
                        query: truncated,
                        duration_ms,
                        timestamp: now,
                    });
                inner.snapshot.database.slow_queries.truncate(MAX_SLOW_QUERIES);

                if duration_ms > VERY_SLOW_QUERY_MS {
                    inner.raise_alert_at(
                        &mut events,
                        AlertType::Warning,
                        "Slow database query detected".to_string(),
                        "Database",
                        format!("Query took {:.0}ms", duration_ms),
                        now,
                    );
                }
            }

            let connections = &mut inner.snapshot.database.connections;
            connections.active = rand::thread_rng().gen_range(1..=10);
            connections.idle = connections.max.saturating_sub(connections.active);
            connections.used_percentage =
                connections.active as f64 / connections.max as f64 * 100.0;

            events.push(MetricEvent::DbChanged(inner.snapshot.database.clone()));
        }
        self.emit_all(events);
    }

    /// Record a service health observation
    ///
    /// Unknown services are inserted. A status transition raises an alert:
    /// error on Unhealthy, warning on Degraded, info on recovery to Healthy
    /// from a non-Healthy state.
    pub fn record_service_health(
        &self,
        name: &str,
        status: ServiceStatus,
        response_time_ms: u64,
        uptime: Option<&str>,
    ) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();

            let position = inner
                .snapshot
                .service_health
                .iter()
                .position(|s| s.name == name);
            let previous = match position {
                Some(index) => {
                    let record = &mut inner.snapshot.service_health[index];
                    let previous = record.status;
                    record.status = status;
                    record.response_time_ms = response_time_ms;
                    record.last_checked = now;
                    if let Some(label) = uptime {
                        record.uptime = label.to_string();
                    }
                    events.push(MetricEvent::ServiceChanged(record.clone()));
                    Some(previous)
                }
                None => {
                    let record = ServiceHealth {
                        name: name.to_string(),
                        status,
                        response_time_ms,
                        uptime: uptime.unwrap_or("100%").to_string(),
                        last_checked: now,
                    };
                    events.push(MetricEvent::ServiceChanged(record.clone()));
                    inner.snapshot.service_health.push(record);
                    None
                }
            };

            if let Some(previous) = previous {
                if previous != status {
                    match status {
                        ServiceStatus::Unhealthy => {
                            inner.raise_alert_at(
                                &mut events,
                                AlertType::Error,
                                format!("{} is now unhealthy", name),
                                name,
                                format!("Response time: {}ms", response_time_ms),
                                now,
                            );
                        }
                        ServiceStatus::Degraded => {
                            inner.raise_alert_at(
                                &mut events,
                                AlertType::Warning,
                                format!("{} is degraded", name),
                                name,
                                format!("Response time: {}ms", response_time_ms),
                                now,
                            );
                        }
                        ServiceStatus::Healthy => {
                            inner.raise_alert_at(
                                &mut events,
                                AlertType::Info,
                                format!("{} has recovered", name),
                                name,
                                "Service is now healthy".to_string(),
                                now,
                            );
                        }
                    }
                }
            }
        }
        self.emit_all(events);
    }

    /// Record a forensic error snapshot
    ///
    /// Kept in a bounded newest-first ring for best-effort trace
    /// correlation; persistence happens through the bus event.
    pub fn record_error_snapshot(&self, snapshot: ErrorSnapshot) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.recent_snapshots.push_front(snapshot.clone());
            inner.recent_snapshots.truncate(MAX_RECENT_SNAPSHOTS);
            events.push(MetricEvent::ErrorSnapshot(snapshot));
        }
        self.emit_all(events);
    }

    /// Raise an alert, subject to de-duplication
    ///
    /// Returns the created alert, or `None` when an identical (type,
    /// service, message) alert was raised within the cooldown window.
    pub fn raise_alert(
        &self,
        kind: AlertType,
        message: &str,
        service: &str,
        details: &str,
    ) -> Option<Alert> {
        self.raise_alert_at(kind, message, service, details, Utc::now())
    }

    /// Raise an alert with an explicit timestamp
    ///
    /// The timestamp drives both the alert's `created_at` and the
    /// de-duplication window; primarily a seam for tests.
    pub fn raise_alert_at(
        &self,
        kind: AlertType,
        message: &str,
        service: &str,
        details: &str,
        now: Timestamp,
    ) -> Option<Alert> {
        let mut events = Vec::new();
        let alert = {
            let mut inner = self.inner.lock().unwrap();
            inner.raise_alert_at(
                &mut events,
                kind,
                message.to_string(),
                service,
                details.to_string(),
                now,
            )
        };
        self.emit_all(events);
        alert
    }

    /// Acknowledge or resolve an alert by id
    ///
    /// Returns `None` when no alert has that id; no state is mutated in
    /// that case. Lifecycle only moves forward: acknowledging a resolved
    /// alert, or repeating an action, returns the alert unchanged. A
    /// mutated alert moves to the front of the list.
    pub fn update_alert_status(&self, id: &str, action: AlertAction) -> Option<Alert> {
        let mut events = Vec::new();
        let updated = {
            let mut inner = self.inner.lock().unwrap();
            let position = inner.snapshot.alerts.iter().position(|a| a.id == id)?;
            let now = Utc::now();

            let changed = {
                let alert = &mut inner.snapshot.alerts[position];
                match action {
                    AlertAction::Acknowledge => {
                        if alert.status == AlertStatus::Active {
                            alert.status = AlertStatus::Acknowledged;
                            alert.acknowledged_at.get_or_insert(now);
                            true
                        } else {
                            false
                        }
                    }
                    AlertAction::Resolve => {
                        if alert.status != AlertStatus::Resolved {
                            alert.status = AlertStatus::Resolved;
                            alert.resolved_at.get_or_insert(now);
                            true
                        } else {
                            false
                        }
                    }
                }
            };

            if changed {
                let alert = inner.snapshot.alerts.remove(position).unwrap();
                inner.snapshot.alerts.push_front(alert.clone());
                events.push(MetricEvent::AlertChanged(alert.clone()));
                Some(alert)
            } else {
                Some(inner.snapshot.alerts[position].clone())
            }
        };
        self.emit_all(events);
        updated
    }

    /// Acknowledge an alert by id
    pub fn acknowledge(&self, id: &str) -> Option<Alert> {
        self.update_alert_status(id, AlertAction::Acknowledge)
    }

    /// Resolve an alert by id
    pub fn resolve(&self, id: &str) -> Option<Alert> {
        self.update_alert_status(id, AlertAction::Resolve)
    }

    /// Refresh the resource gauges and return the current aggregate
    pub fn snapshot(&self) -> MetricSnapshot {
        let mut events = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.refresh_resources(&mut events);
            inner.snapshot.clone()
        };
        self.emit_all(events);
        snapshot
    }

    /// Refresh the resource gauges without cloning the snapshot
    pub fn refresh_resources(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.refresh_resources(&mut events);
        }
        self.emit_all(events);
    }

    fn emit_all(&self, events: Vec<MetricEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }
}

impl Inner {
    fn ignored_not_found(&self, endpoint: &str) -> bool {
        self.ignore_not_found.iter().any(|e| e == endpoint)
    }

    fn add_log(
        &mut self,
        events: &mut Vec<MetricEvent>,
        endpoint: &str,
        status: u16,
        duration_ms: u64,
        now: Timestamp,
    ) {
        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint: endpoint.to_string(),
            status,
            message: reason_phrase(status),
            timestamp: now,
            duration_ms,
        };
        self.snapshot.logs.push_front(entry.clone());
        self.snapshot.logs.truncate(MAX_LOGS);
        events.push(MetricEvent::LogAppended(entry));
    }

    fn raise_alert_at(
        &mut self,
        events: &mut Vec<MetricEvent>,
        kind: AlertType,
        message: String,
        service: &str,
        details: String,
        now: Timestamp,
    ) -> Option<Alert> {
        let key = format!("{}|{}|{}", kind.as_str(), service, message);
        if !self.dedup.permit_at(&key, now) {
            debug!("suppressed duplicate alert within cooldown: {}", key);
            return None;
        }

        let trace_id = correlate_trace_id(&message, &self.recent_snapshots);
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            message,
            service: service.to_string(),
            details,
            status: AlertStatus::Active,
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
            trace_id,
        };
        self.snapshot.alerts.push_front(alert.clone());
        self.snapshot.alerts.truncate(MAX_ALERTS);
        events.push(MetricEvent::AlertChanged(alert.clone()));
        Some(alert)
    }

    fn refresh_resources(&mut self, events: &mut Vec<MetricEvent>) {
        let Some(sample) = self.sampler.sample() else {
            // Telemetry unavailable; gauges keep their last known values.
            debug!("resource sampling unavailable, keeping last known gauges");
            return;
        };

        let cpu = &mut self.snapshot.resources.cpu;
        cpu.current = sample.cpu_usage_pct.min(100.0);
        cpu.peak = cpu.peak.max(cpu.current);
        cpu.average = ema(cpu.average, cpu.current);
        cpu.cores = sample.cores;

        let gib = 1024 * 1024 * 1024;
        let memory = &mut self.snapshot.resources.memory;
        memory.total_gb = sample.total_mem_bytes / gib;
        memory.used_gb = sample.used_mem_bytes / gib;
        memory.free_gb = memory.total_gb.saturating_sub(memory.used_gb);
        memory.used_percentage = if sample.total_mem_bytes > 0 {
            sample.used_mem_bytes as f64 / sample.total_mem_bytes as f64 * 100.0
        } else {
            0.0
        };

        events.push(MetricEvent::ResourcesChanged(self.snapshot.resources.clone()));
    }
}

/// Best-effort correlation of an alert message with a recent error snapshot
///
/// Parses an endpoint out of "... on /path" message text and returns the
/// trace id of the newest matching snapshot. Purely advisory: a miss is
/// normal and never an error. Once producers pass a structured correlation
/// id this function can be retired without touching alert semantics.
fn correlate_trace_id(message: &str, recent: &VecDeque<ErrorSnapshot>) -> Option<String> {
    static ENDPOINT_RE: OnceLock<Regex> = OnceLock::new();
    let re = ENDPOINT_RE.get_or_init(|| Regex::new(r" on (/\S+)").unwrap());
    let path = re.captures(message)?.get(1)?.as_str();
    recent
        .iter()
        .find(|s| s.trace_id.is_some() && s.endpoint.contains(path))
        .and_then(|s| s.trace_id.clone())
}

/// Canonical reason phrase for an error status code
fn reason_phrase(status: u16) -> String {
    match status {
        400 => "Bad Request".to_string(),
        401 => "Unauthorized".to_string(),
        403 => "Forbidden".to_string(),
        404 => "Not Found".to_string(),
        422 => "Unprocessable Entity".to_string(),
        429 => "Too Many Requests".to_string(),
        500 => "Internal Server Error".to_string(),
        502 => "Bad Gateway".to_string(),
        503 => "Service Unavailable".to_string(),
        504 => "Gateway Timeout".to_string(),
        other => format!("Error {}", other),
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_alert_list_never_exceeds_cap(count: u16) -> bool {
        let count = count % 300;
        let aggregator =
            MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        let now = Utc::now();

        for i in 0..count {
            aggregator.raise_alert_at(
                AlertType::Info,
                &format!("alert {}", i),
                "Test",
                "details",
                now,
            );
        }

        let len = aggregator.snapshot().alerts.len();
        len <= 100 && len == (count as usize).min(100)
    }

    #[quickcheck]
    fn prop_error_rate_matches_ratio(statuses: Vec<bool>) -> bool {
        if statuses.is_empty() {
            return true;
        }
        let aggregator =
            MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());

        let mut errors = 0usize;
        for is_error in &statuses {
            let status = if *is_error {
                errors += 1;
                500
            } else {
                200
            };
            aggregator.record_request("/api/prop", 10, status);
        }

        let expected = errors as f64 / statuses.len() as f64 * 100.0;
        (aggregator.snapshot().stats.error_rate - expected).abs() < 1e-9
    }
}
