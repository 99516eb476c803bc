//! Synthetic probe scheduling
//!
//! Each monitor runs on its own task with its own failure counter, so no
//! global lock sits between monitors. Scheduling applies jitter and, when
//! the monitor opts in, exponential backoff capped at 5x. The very first
//! run per monitor is spread over a configurable window so many monitors
//! starting together do not all probe at once.

use crate::aggregator::MetricsAggregator;
use crate::alerts::AlertNotifier;
use crate::error::ProbeError;
use crate::events::{AlertType, ErrorSnapshot, ServiceStatus};
use crate::settings::ApiKeys;
use crate::synthetics::monitor::{Monitor, ProbeResult};
use crate::synthetics::prober::{ProbeOutcome, Prober};
use chrono::Utc;
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Floor for the scheduling interval between probes of one monitor
const MIN_BASE_INTERVAL_MS: u64 = 15_000;
/// Floor for any computed delay
const MIN_DELAY_MS: u64 = 1000;
/// Cap on the consecutive-failure counter
const MAX_FAILURES: u32 = 5;
/// Cap on the backoff multiplier
const MAX_BACKOFF_FACTOR: f64 = 5.0;
/// Fallback window for the first-run spread
const SPREAD_FALLBACK_MS: u64 = 5000;
/// How many probe results are retained for status reporting
const LAST_RESULTS_CAP: usize = 20;
/// How much of the response body goes into a forensic snapshot
const SNAPSHOT_SNIPPET_CHARS: usize = 2048;

/// Scheduler configuration, sourced from settings
#[derive(Debug, Clone)]
pub struct SyntheticsConfig {
    pub monitors: Vec<Monitor>,
    pub api_keys: ApiKeys,
    /// Global jitter fraction, used when a monitor has no override
    pub jitter_pct: f64,
    /// Window for the randomized first-run delay
    pub spread_start_ms: u64,
}

impl Default for SyntheticsConfig {
    fn default() -> Self {
        Self {
            monitors: Vec::new(),
            api_keys: ApiKeys::default(),
            jitter_pct: 0.2,
            spread_start_ms: 2000,
        }
    }
}

/// Scheduler state reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticsStatus {
    pub running: bool,
    pub last_results: Vec<ProbeResult>,
}

/// Backoff multiplier for a monitor with `failures` consecutive failures
pub(crate) fn backoff_factor(enabled: bool, failures: u32) -> f64 {
    if !enabled {
        return 1.0;
    }
    ((1u64 << failures.min(MAX_FAILURES)) as f64).min(MAX_BACKOFF_FACTOR)
}

/// Jitter multiplier: 1 plus a uniform sample in [-pct, pct]
pub(crate) fn jitter_factor(jitter_pct: f64) -> f64 {
    let pct = jitter_pct.clamp(0.0, 0.9);
    1.0 + rand::thread_rng().gen_range(-1.0..=1.0) * pct
}

/// Delay until the next probe, floored at one second
pub(crate) fn probe_delay_ms(base_ms: u64, jitter: f64, backoff: f64) -> u64 {
    ((base_ms as f64 * jitter * backoff).round() as u64).max(MIN_DELAY_MS)
}

/// Randomized first-run delay within the spread window
pub(crate) fn spread_delay_ms(spread_ms: u64, base_ms: u64) -> u64 {
    let window = if spread_ms > 0 {
        spread_ms
    } else {
        base_ms.min(SPREAD_FALLBACK_MS)
    };
    rand::thread_rng().gen_range(0..window.max(1))
}

/// Health classification of a probe outcome against its latency budget
pub(crate) fn classify(ok: bool, response_ms: u64, budget_ms: u64) -> ServiceStatus {
    if ok && response_ms <= budget_ms {
        ServiceStatus::Healthy
    } else if ok {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Unhealthy
    }
}

/// State shared between the scheduler and its per-monitor tasks
struct Shared {
    aggregator: MetricsAggregator,
    notifier: AlertNotifier,
    prober: Prober,
    api_keys: ApiKeys,
    last_results: Mutex<VecDeque<ProbeResult>>,
}

impl Shared {
    /// Probe one monitor and feed the outcome back into the aggregator
    ///
    /// Always records a service-health update. Failures raise an error
    /// alert, slow successes a warning; both dispatch notifications and
    /// capture a forensic snapshot.
    async fn probe_and_record(&self, monitor: &Monitor) -> ProbeResult {
        let outcome = self.prober.probe(monitor, &self.api_keys).await;
        let result = outcome.result.clone();
        let budget_ms = monitor.max_latency_ms.max(1);

        let status = classify(result.ok, result.response_ms, budget_ms);
        self.aggregator
            .record_service_health(&result.name, status, result.response_ms, None);

        if !result.ok {
            let title = format!("Synthetic failed: {}", result.name);
            let details = match &result.error {
                Some(e) => format!(
                    "Expected {}, got {}. {}",
                    monitor.expected_status, result.status, e
                ),
                None => format!("Expected {}, got {}.", monitor.expected_status, result.status),
            };
            self.aggregator
                .raise_alert(AlertType::Error, &title, "Synthetics", &details);
            self.notifier.dispatch(AlertType::Error, &title, &details);
            self.aggregator
                .record_error_snapshot(snapshot_of(&outcome, monitor));
        } else if result.response_ms > budget_ms {
            let title = format!("Synthetic slow: {}", result.name);
            let details = format!("Response {}ms > {}ms", result.response_ms, budget_ms);
            self.aggregator
                .raise_alert(AlertType::Warning, &title, "Synthetics", &details);
            self.notifier.dispatch(AlertType::Warning, &title, &details);
            self.aggregator
                .record_error_snapshot(snapshot_of(&outcome, monitor));
        }

        result
    }

    fn remember(&self, result: &ProbeResult) {
        let mut results = self.last_results.lock().unwrap();
        results.push_front(result.clone());
        results.truncate(LAST_RESULTS_CAP);
    }
}

fn snapshot_of(outcome: &ProbeOutcome, monitor: &Monitor) -> ErrorSnapshot {
    ErrorSnapshot {
        id: uuid::Uuid::new_v4().to_string(),
        source: "synthetics".to_string(),
        endpoint: monitor.url.clone(),
        method: monitor.method.clone(),
        status: outcome.result.status,
        request_headers: outcome.request_headers.clone(),
        request_body: outcome.request_body.clone(),
        response_snippet: outcome
            .body_snippet
            .chars()
            .take(SNAPSHOT_SNIPPET_CHARS)
            .collect(),
        trace_id: None,
        timestamp: Utc::now(),
    }
}

/// The synthetic probe scheduler
pub struct Synthetics {
    shared: Arc<Shared>,
    config: SyntheticsConfig,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Synthetics {
    pub fn new(
        aggregator: MetricsAggregator,
        notifier: AlertNotifier,
        config: SyntheticsConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                aggregator,
                notifier,
                prober: Prober::new(),
                api_keys: config.api_keys.clone(),
                last_results: Mutex::new(VecDeque::new()),
            }),
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start one scheduling task per valid monitor; idempotent
    ///
    /// Zero configured monitors is nothing to do, not an error.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let jitter_pct = self.config.jitter_pct.clamp(0.0, 0.9);
        let spread_ms = self.config.spread_start_ms;
        let mut handles = self.handles.lock().unwrap();
        let mut started = 0usize;
        for monitor in &self.config.monitors {
            if let Err(e) = monitor.validate() {
                warn!("skipping monitor {:?}: {}", monitor.name, e);
                continue;
            }
            let monitor = monitor.normalized();
            let shared = Arc::clone(&self.shared);
            let running = Arc::clone(&self.running);
            handles.push(tokio::spawn(monitor_loop(
                shared, monitor, running, jitter_pct, spread_ms,
            )));
            started += 1;
        }
        info!("synthetics started, scheduling {} monitors", started);
    }

    /// Cancel every pending probe timer; idempotent
    ///
    /// In-flight probes are aborted at their next await point; a result
    /// that does land after stop cannot reschedule because every loop
    /// rechecks the running flag.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("synthetics stopped");
    }

    /// Current state: running flag and recent results
    pub fn status(&self) -> SyntheticsStatus {
        SyntheticsStatus {
            running: self.running.load(Ordering::SeqCst),
            last_results: self
                .shared
                .last_results
                .lock()
                .unwrap()
                .iter()
                .cloned()
                .collect(),
        }
    }

    /// Number of scheduled monitor tasks still registered
    pub fn scheduled_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Probe every configured monitor once, on demand
    ///
    /// Results replace the retained list. The schedule is unaffected.
    pub async fn run_once(&self) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        for monitor in &self.config.monitors {
            if monitor.validate().is_err() {
                continue;
            }
            let monitor = monitor.normalized();
            results.push(self.shared.probe_and_record(&monitor).await);
        }
        {
            let mut last = self.shared.last_results.lock().unwrap();
            last.clear();
            last.extend(results.iter().cloned());
        }
        results
    }

    /// Probe a single ad-hoc monitor definition
    ///
    /// Used by the test-before-saving workflow; the persistent schedule is
    /// untouched and the result is prepended to the retained list.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::InvalidMonitor` without probing when the
    /// definition fails validation.
    pub async fn run_single(&self, monitor: &Monitor) -> Result<ProbeResult, ProbeError> {
        monitor.validate()?;
        let monitor = monitor.normalized();
        let result = self.shared.probe_and_record(&monitor).await;
        self.shared.remember(&result);
        Ok(result)
    }

    /// Validate and probe a monitor definition without saving it
    pub async fn test(&self, monitor: &Monitor) -> Result<ProbeResult, ProbeError> {
        self.run_single(monitor).await
    }
}

impl Drop for Synthetics {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn monitor_loop(
    shared: Arc<Shared>,
    monitor: Monitor,
    running: Arc<AtomicBool>,
    global_jitter_pct: f64,
    spread_ms: u64,
) {
    let base_ms = monitor.interval_ms.max(MIN_BASE_INTERVAL_MS);
    let jitter_pct = monitor.jitter_pct.unwrap_or(global_jitter_pct);

    let initial = spread_delay_ms(spread_ms, base_ms);
    tokio::time::sleep(Duration::from_millis(initial)).await;

    let mut failures: u32 = 0;
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let result = shared.probe_and_record(&monitor).await;
        failures = if result.ok {
            0
        } else {
            (failures + 1).min(MAX_FAILURES)
        };
        // Recheck after the probe so a result landing post-stop cannot
        // schedule a new timer.
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let delay = probe_delay_ms(
            base_ms,
            jitter_factor(jitter_pct),
            backoff_factor(monitor.backoff, failures),
        );
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
