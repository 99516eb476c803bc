//! Synthetic monitor definitions
//!
//! A `Monitor` is configuration, not runtime state: the scheduler treats it
//! as immutable for the duration of a run cycle. Loaded from settings and
//! sanitized through `normalized()`.

use crate::error::ProbeError;
use crate::events::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Methods a monitor may use
const SUPPORTED_METHODS: [&str; 6] = ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"];

fn default_name() -> String {
    "Monitor".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

fn default_max_latency_ms() -> u64 {
    1000
}

fn default_interval_ms() -> u64 {
    60_000
}

/// A configured synthetic HTTP probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Monitor {
    pub name: String,
    pub url: String,
    pub method: String,
    pub expected_status: u16,
    /// Latency budget; also bounds the probe timeout
    pub max_latency_ms: u64,
    pub interval_ms: u64,
    pub headers: HashMap<String, String>,
    /// Use the development API key instead of the production one
    pub use_dev_key: bool,
    pub bearer_token: Option<String>,
    /// Substring the response body must contain for the probe to pass
    pub expected_body_contains: Option<String>,
    /// Per-monitor jitter override, clamped to [0, 0.9]
    pub jitter_pct: Option<f64>,
    /// Opt into exponential backoff after consecutive failures
    pub backoff: bool,
    /// Optional JSON body for methods that carry one
    pub body: Option<serde_json::Value>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            name: default_name(),
            url: String::new(),
            method: default_method(),
            expected_status: default_expected_status(),
            max_latency_ms: default_max_latency_ms(),
            interval_ms: default_interval_ms(),
            headers: HashMap::new(),
            use_dev_key: false,
            bearer_token: None,
            expected_body_contains: None,
            jitter_pct: None,
            backoff: false,
            body: None,
        }
    }
}

impl Monitor {
    /// Check the definition before probing or saving
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::InvalidMonitor` for an empty or non-HTTP url or
    /// an unsupported method. Validation never mutates state.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.url.is_empty() {
            return Err(ProbeError::InvalidMonitor("url is required".to_string()));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ProbeError::InvalidMonitor(format!(
                "url must be http(s): {}",
                self.url
            )));
        }
        let method = self.method.to_uppercase();
        if !SUPPORTED_METHODS.contains(&method.as_str()) {
            return Err(ProbeError::InvalidMonitor(format!(
                "unsupported method: {}",
                self.method
            )));
        }
        Ok(())
    }

    /// Copy with clamped values and an uppercased method
    pub fn normalized(&self) -> Self {
        let mut monitor = self.clone();
        monitor.method = monitor.method.to_uppercase();
        monitor.max_latency_ms = monitor.max_latency_ms.max(1);
        monitor.interval_ms = monitor.interval_ms.max(1000);
        monitor.jitter_pct = monitor.jitter_pct.map(|j| j.clamp(0.0, 0.9));
        monitor
    }
}

/// Outcome of one probe execution
///
/// Ephemeral: only the last few results are held for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub name: String,
    pub url: String,
    pub ok: bool,
    /// HTTP status, or 0 when the request never completed
    pub status: u16,
    pub response_ms: u64,
    pub timestamp: Timestamp,
    pub error: Option<String>,
    /// First 256 characters of the response body, when it was read
    pub body_preview: String,
}
