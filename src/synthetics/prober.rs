//! HTTP probe execution
//!
//! One probe is one bounded HTTP call: the timeout equals the monitor's
//! latency budget (with a 1 s floor), configured headers and credentials
//! are attached, and success requires the expected status plus, when
//! configured, an expected substring in the first 64 KiB of the body.
//! Network failures become failed results, never errors.

use crate::settings::ApiKeys;
use crate::synthetics::monitor::{Monitor, ProbeResult};
use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Floor for the probe timeout in milliseconds
const MIN_TIMEOUT_MS: u64 = 1000;
/// Cap on how much of the response body is read
const BODY_READ_CAP: usize = 64 * 1024;
/// Length of the body preview kept on the result
const BODY_PREVIEW_CHARS: usize = 256;

/// One probe execution with its request context, kept for forensics
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    /// Headers that were sent, as plain strings
    pub request_headers: HashMap<String, String>,
    /// Serialized request body, when one was sent
    pub request_body: Option<String>,
    /// Response body read up to the cap
    pub body_snippet: String,
}

/// Executes synthetic probes over a shared HTTP client
#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Run one probe against a normalized monitor definition
    ///
    /// Never fails: timeouts, connection errors and assertion mismatches
    /// all fold into a `ProbeResult` with `ok = false`.
    pub async fn probe(&self, monitor: &Monitor, api_keys: &ApiKeys) -> ProbeOutcome {
        let started = Instant::now();
        let timeout = Duration::from_millis(monitor.max_latency_ms.max(MIN_TIMEOUT_MS));
        let method = Method::from_bytes(monitor.method.as_bytes()).unwrap_or(Method::GET);
        let headers = build_headers(monitor, api_keys);

        let mut request = self
            .client
            .request(method.clone(), &monitor.url)
            .headers(headers.clone())
            .timeout(timeout);

        let mut request_body = None;
        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = &monitor.body {
                let payload = match body {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !headers.contains_key(CONTENT_TYPE) {
                    request = request.header(CONTENT_TYPE, "application/json");
                }
                request = request.body(payload.clone());
                request_body = Some(payload);
            }
        }

        let mut ok = false;
        let mut status = 0u16;
        let mut error = None;
        let mut body_snippet = String::new();

        match request.send().await {
            Ok(response) => {
                status = response.status().as_u16();
                ok = status == monitor.expected_status;
                if ok {
                    if let Some(expected) = &monitor.expected_body_contains {
                        body_snippet = read_capped(response).await;
                        if !body_snippet.contains(expected) {
                            ok = false;
                            error =
                                Some(format!("Body missing expected text: {}", expected));
                        }
                    }
                }
            }
            Err(e) => {
                error = Some(e.to_string());
            }
        }

        let response_ms = started.elapsed().as_millis() as u64;
        debug!(
            "probe {} {} -> status={} ok={} in {}ms",
            monitor.method, monitor.url, status, ok, response_ms
        );

        ProbeOutcome {
            result: ProbeResult {
                name: if monitor.name.is_empty() {
                    monitor.url.clone()
                } else {
                    monitor.name.clone()
                },
                url: monitor.url.clone(),
                ok,
                status,
                response_ms,
                timestamp: Utc::now(),
                error,
                body_preview: body_snippet.chars().take(BODY_PREVIEW_CHARS).collect(),
            },
            request_headers: headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or("").to_string(),
                    )
                })
                .collect(),
            request_body,
            body_snippet,
        }
    }
}

/// Assemble the headers for a probe request
///
/// Configured headers win; an `x-api-key` falls back to the production or
/// development key per the monitor's flag, and a bearer token fills
/// `Authorization` when none was given.
pub(crate) fn build_headers(monitor: &Monitor, api_keys: &ApiKeys) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in &monitor.headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("skipping invalid monitor header: {}", key),
        }
    }

    if !headers.contains_key("x-api-key") {
        let key = if monitor.use_dev_key {
            &api_keys.development
        } else {
            &api_keys.production
        };
        if !key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("x-api-key", value);
            }
        }
    }

    if !headers.contains_key(AUTHORIZATION) {
        if let Some(token) = &monitor.bearer_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
    }

    headers
}

/// Read the response body up to the cap, tolerating read errors
async fn read_capped(mut response: reqwest::Response) -> String {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                buffer.extend_from_slice(&chunk);
                if buffer.len() >= BODY_READ_CAP {
                    buffer.truncate(BODY_READ_CAP);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("body read stopped early: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
