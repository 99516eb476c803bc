//! Core entity types and bus events for the API monitoring core
//!
//! This module defines the fundamental data structures shared across the
//! aggregator, alert engine, probe scheduler, store and broadcaster, plus the
//! typed `MetricEvent` that flows over the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Severity class of an alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// A failure that needs attention now
    Error,
    /// A degradation or threshold breach
    Warning,
    /// A recovery or informational notice
    Info,
}

impl AlertType {
    /// Lowercase label used in de-duplication keys and notification payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Error => "error",
            AlertType::Warning => "warning",
            AlertType::Info => "info",
        }
    }
}

/// Lifecycle state of an alert
///
/// Transitions only move forward: active to acknowledged to resolved, or
/// active directly to resolved. There is no path back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// An alert raised by the threshold engine, the probe scheduler, or the
/// aggregator's own ingestion checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Opaque unique id, generated at creation
    pub id: String,
    /// Severity class
    #[serde(rename = "type")]
    pub kind: AlertType,
    /// Human-readable summary, e.g. "Server error on /api/orders"
    pub message: String,
    /// Logical service the alert concerns
    pub service: String,
    /// Free-form detail text, e.g. "Status code: 503"
    pub details: String,
    /// Current lifecycle state
    pub status: AlertStatus,
    /// When the alert was raised
    pub created_at: Timestamp,
    /// When the alert was acknowledged; set exactly once, never cleared
    pub acknowledged_at: Option<Timestamp>,
    /// When the alert was resolved; set exactly once, never cleared
    pub resolved_at: Option<Timestamp>,
    /// Best-effort correlated trace id, when a recent error snapshot matched
    pub trace_id: Option<String>,
}

/// A single request log entry, recorded for error responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub endpoint: String,
    pub status: u16,
    pub message: String,
    pub timestamp: Timestamp,
    pub duration_ms: u64,
}

/// Health classification of a monitored service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "Healthy",
            ServiceStatus::Degraded => "Degraded",
            ServiceStatus::Unhealthy => "Unhealthy",
        }
    }
}

/// Latest known health of a single service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub response_time_ms: u64,
    /// Display label such as "99.9%"; not recomputed on every check
    pub uptime: String,
    pub last_checked: Timestamp,
}

/// A slow database query, truncated for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowQuery {
    pub query: String,
    pub duration_ms: f64,
    pub timestamp: Timestamp,
}

/// Forensic capture of a failed or suspicious request/response exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSnapshot {
    pub id: String,
    /// Producer of the snapshot, e.g. "synthetics" or "api"
    pub source: String,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub response_snippet: String,
    pub trace_id: Option<String>,
    pub timestamp: Timestamp,
}

/// Payload for the api-request event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiRequestEvent {
    pub endpoint: String,
    pub duration_ms: u64,
    pub status: u16,
}

/// Typed event published on the bus for every aggregator mutation
///
/// One variant per event kind; `name()` yields the wire name consumed by
/// streaming clients.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    ApiRequest(ApiRequestEvent),
    StatsChanged(crate::aggregator::Stats),
    EndpointChanged(crate::aggregator::EndpointMetrics),
    DbChanged(crate::aggregator::DatabaseMetrics),
    ServiceChanged(ServiceHealth),
    AlertChanged(Alert),
    LogAppended(LogEntry),
    ResourcesChanged(crate::aggregator::ResourceMetrics),
    ErrorSnapshot(ErrorSnapshot),
}

impl MetricEvent {
    /// Wire name of the event kind
    pub fn name(&self) -> &'static str {
        match self {
            MetricEvent::ApiRequest(_) => "api-request",
            MetricEvent::StatsChanged(_) => "stats-changed",
            MetricEvent::EndpointChanged(_) => "endpoint-changed",
            MetricEvent::DbChanged(_) => "db-changed",
            MetricEvent::ServiceChanged(_) => "service-changed",
            MetricEvent::AlertChanged(_) => "alert-changed",
            MetricEvent::LogAppended(_) => "log-appended",
            MetricEvent::ResourcesChanged(_) => "resources-changed",
            MetricEvent::ErrorSnapshot(_) => "error-snapshot",
        }
    }

    /// Serialize the payload for streaming clients
    pub fn payload(&self) -> serde_json::Value {
        let result = match self {
            MetricEvent::ApiRequest(p) => serde_json::to_value(p),
            MetricEvent::StatsChanged(p) => serde_json::to_value(p),
            MetricEvent::EndpointChanged(p) => serde_json::to_value(p),
            MetricEvent::DbChanged(p) => serde_json::to_value(p),
            MetricEvent::ServiceChanged(p) => serde_json::to_value(p),
            MetricEvent::AlertChanged(p) => serde_json::to_value(p),
            MetricEvent::LogAppended(p) => serde_json::to_value(p),
            MetricEvent::ResourcesChanged(p) => serde_json::to_value(p),
            MetricEvent::ErrorSnapshot(p) => serde_json::to_value(p),
        };
        result.unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_alert_serialization() {
        let alert = Alert {
            id: "a-1".to_string(),
            kind: AlertType::Error,
            message: "Server error on /api/orders".to_string(),
            service: "API Gateway".to_string(),
            details: "Status code: 503".to_string(),
            status: AlertStatus::Active,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
            trace_id: None,
        };

        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"status\":\"active\""));
        let deserialized: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert, deserialized);
    }

    #[test]
    fn test_alert_type_serialization() {
        assert_eq!(
            serde_json::to_string(&AlertType::Error).unwrap(),
            "\"error\""
        );
        assert_eq!(
            serde_json::to_string(&AlertType::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(serde_json::to_string(&AlertType::Info).unwrap(), "\"info\"");
    }

    #[test]
    fn test_service_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Healthy).unwrap(),
            "\"Healthy\""
        );
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Degraded).unwrap(),
            "\"Degraded\""
        );
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Unhealthy).unwrap(),
            "\"Unhealthy\""
        );
    }

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry {
            id: "l-1".to_string(),
            endpoint: "/api/users".to_string(),
            status: 404,
            message: "Not Found".to_string(),
            timestamp: Utc::now(),
            duration_ms: 120,
        };

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, deserialized);
    }

    #[test]
    fn test_event_names() {
        let event = MetricEvent::ApiRequest(ApiRequestEvent {
            endpoint: "/api/users".to_string(),
            duration_ms: 42,
            status: 200,
        });
        assert_eq!(event.name(), "api-request");

        let entry = LogEntry {
            id: "l-1".to_string(),
            endpoint: "/api/users".to_string(),
            status: 500,
            message: "Internal Server Error".to_string(),
            timestamp: Utc::now(),
            duration_ms: 10,
        };
        assert_eq!(MetricEvent::LogAppended(entry).name(), "log-appended");
    }

    #[test]
    fn test_event_payload_round_trips() {
        let event = MetricEvent::ApiRequest(ApiRequestEvent {
            endpoint: "/api/orders".to_string(),
            duration_ms: 600,
            status: 503,
        });
        let payload = event.payload();
        assert_eq!(payload["endpoint"], "/api/orders");
        assert_eq!(payload["status"], 503);
    }
}
