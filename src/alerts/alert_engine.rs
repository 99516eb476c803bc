//! Periodic threshold evaluation
//!
//! The engine wakes on a fixed interval, reads the current aggregate and
//! compares the derived stats and resource gauges against runtime-mutable
//! thresholds. Every breach goes through the aggregator's raise-alert
//! operation, so the de-duplication window decides what actually surfaces.

use crate::aggregator::{MetricSnapshot, MetricsAggregator};
use crate::error::SettingsError;
use crate::events::AlertType;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Alert thresholds, all independently settable at runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Error rate in percent
    pub error_rate_pct: f64,
    /// Average response time in milliseconds
    pub response_time_ms: f64,
    /// CPU usage in percent
    pub cpu_usage_pct: f64,
    /// Memory usage in percent
    pub memory_usage_pct: f64,
    /// Average database query time in milliseconds
    pub db_query_time_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            error_rate_pct: 5.0,
            response_time_ms: 500.0,
            cpu_usage_pct: 80.0,
            memory_usage_pct: 75.0,
            db_query_time_ms: 500.0,
        }
    }
}

impl Thresholds {
    /// Check that every threshold is a positive finite number
    pub fn validate(&self) -> Result<(), SettingsError> {
        let values = [
            ("error_rate_pct", self.error_rate_pct),
            ("response_time_ms", self.response_time_ms),
            ("cpu_usage_pct", self.cpu_usage_pct),
            ("memory_usage_pct", self.memory_usage_pct),
            ("db_query_time_ms", self.db_query_time_ms),
        ];
        for (name, value) in values {
            if !value.is_finite() || value <= 0.0 {
                return Err(SettingsError::ValidationError(format!(
                    "threshold {} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// A single threshold breach detected in one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub kind: AlertType,
    pub message: String,
    pub service: &'static str,
    pub details: String,
}

/// Compare a snapshot against the thresholds
///
/// Pure so one bad comparison can never abort the rest; the caller raises
/// an alert per returned breach.
pub fn evaluate(snapshot: &MetricSnapshot, thresholds: &Thresholds) -> Vec<Breach> {
    let mut breaches = Vec::new();

    if snapshot.stats.error_rate > thresholds.error_rate_pct {
        breaches.push(Breach {
            kind: AlertType::Error,
            message: format!("High error rate detected: {:.1}%", snapshot.stats.error_rate),
            service: "API Gateway",
            details: format!("Threshold: {}%", thresholds.error_rate_pct),
        });
    }

    if snapshot.stats.avg_response_time > thresholds.response_time_ms {
        breaches.push(Breach {
            kind: AlertType::Warning,
            message: format!(
                "Slow response time: {:.0}ms",
                snapshot.stats.avg_response_time
            ),
            service: "API Gateway",
            details: format!("Threshold: {}ms", thresholds.response_time_ms),
        });
    }

    if snapshot.resources.cpu.current > thresholds.cpu_usage_pct {
        breaches.push(Breach {
            kind: AlertType::Warning,
            message: format!("High CPU usage: {:.1}%", snapshot.resources.cpu.current),
            service: "System",
            details: format!("Threshold: {}%", thresholds.cpu_usage_pct),
        });
    }

    if snapshot.resources.memory.used_percentage > thresholds.memory_usage_pct {
        breaches.push(Breach {
            kind: AlertType::Warning,
            message: format!(
                "High memory usage: {:.1}%",
                snapshot.resources.memory.used_percentage
            ),
            service: "System",
            details: format!("Threshold: {}%", thresholds.memory_usage_pct),
        });
    }

    if snapshot.database.queries.average > thresholds.db_query_time_ms {
        breaches.push(Breach {
            kind: AlertType::Warning,
            message: format!(
                "Slow database queries: {:.0}ms average",
                snapshot.database.queries.average
            ),
            service: "Database",
            details: format!("Threshold: {}ms", thresholds.db_query_time_ms),
        });
    }

    breaches
}

/// Periodic threshold checker
pub struct AlertEngine {
    aggregator: MetricsAggregator,
    thresholds: Arc<RwLock<Thresholds>>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl AlertEngine {
    /// Create an engine; call `start` to begin checking
    pub fn new(aggregator: MetricsAggregator, thresholds: Thresholds, interval: Duration) -> Self {
        Self {
            aggregator,
            thresholds: Arc::new(RwLock::new(thresholds)),
            interval,
            handle: None,
        }
    }

    /// Current thresholds
    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read().unwrap()
    }

    /// Replace the thresholds
    ///
    /// Validation failures reject the whole update; nothing is partially
    /// applied. A successful update takes effect on the next tick.
    pub fn set_thresholds(&self, thresholds: Thresholds) -> Result<Thresholds, SettingsError> {
        thresholds.validate()?;
        *self.thresholds.write().unwrap() = thresholds;
        info!("alert thresholds updated: {:?}", thresholds);
        Ok(thresholds)
    }

    /// Start the periodic check task
    ///
    /// Calling start on a running engine is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        info!(
            "starting alert engine, checking every {:?}",
            self.interval
        );
        let aggregator = self.aggregator.clone();
        let thresholds = Arc::clone(&self.thresholds);
        let period = self.interval;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; consume it so the first
            // real check happens one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = aggregator.snapshot();
                let current = *thresholds.read().unwrap();
                let breaches = evaluate(&snapshot, &current);
                debug!("alert engine tick: {} breaches", breaches.len());
                for breach in breaches {
                    aggregator.raise_alert(
                        breach.kind,
                        &breach.message,
                        breach.service,
                        &breach.details,
                    );
                }
            }
        }));
    }

    /// Stop the periodic check task; idempotent
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("alert engine stopped");
        }
    }

    /// Whether the check task is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for AlertEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::bus::EventBus;

    fn breached_snapshot() -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::default();
        snapshot.stats.error_rate = 7.5;
        snapshot.stats.avg_response_time = 620.0;
        snapshot.resources.cpu.current = 91.0;
        snapshot.resources.memory.used_percentage = 82.0;
        snapshot.database.queries.average = 750.0;
        snapshot
    }

    #[test]
    fn test_evaluate_reports_all_breaches() {
        let breaches = evaluate(&breached_snapshot(), &Thresholds::default());

        assert_eq!(breaches.len(), 5);
        assert_eq!(breaches[0].kind, AlertType::Error);
        assert!(breaches[0].message.contains("7.5%"));
        assert!(breaches[0].details.contains("Threshold: 5%"));
        assert!(breaches[1].message.contains("620ms"));
        assert!(breaches[2].message.contains("91.0%"));
        assert!(breaches[3].message.contains("82.0%"));
        assert!(breaches[4].message.contains("750ms"));
    }

    #[test]
    fn test_evaluate_quiet_snapshot() {
        let breaches = evaluate(&MetricSnapshot::default(), &Thresholds::default());
        assert!(breaches.is_empty());
    }

    #[test]
    fn test_evaluate_respects_custom_thresholds() {
        let mut snapshot = MetricSnapshot::default();
        snapshot.stats.error_rate = 3.0;

        assert!(evaluate(&snapshot, &Thresholds::default()).is_empty());

        let strict = Thresholds {
            error_rate_pct: 1.0,
            ..Thresholds::default()
        };
        let breaches = evaluate(&snapshot, &strict);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].service, "API Gateway");
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::default().validate().is_ok());

        let zero = Thresholds {
            cpu_usage_pct: 0.0,
            ..Thresholds::default()
        };
        assert!(zero.validate().is_err());

        let negative = Thresholds {
            response_time_ms: -5.0,
            ..Thresholds::default()
        };
        assert!(negative.validate().is_err());

        let nan = Thresholds {
            error_rate_pct: f64::NAN,
            ..Thresholds::default()
        };
        assert!(nan.validate().is_err());
    }

    #[tokio::test]
    async fn test_set_thresholds_rejects_without_applying() {
        let aggregator = MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        let engine = AlertEngine::new(
            aggregator,
            Thresholds::default(),
            Duration::from_secs(60),
        );

        let invalid = Thresholds {
            memory_usage_pct: -1.0,
            ..Thresholds::default()
        };
        assert!(engine.set_thresholds(invalid).is_err());
        assert_eq!(engine.thresholds(), Thresholds::default());

        let updated = Thresholds {
            error_rate_pct: 10.0,
            ..Thresholds::default()
        };
        engine.set_thresholds(updated).unwrap();
        assert_eq!(engine.thresholds().error_rate_pct, 10.0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let aggregator = MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        let mut engine = AlertEngine::new(
            aggregator,
            Thresholds::default(),
            Duration::from_secs(60),
        );

        engine.start();
        assert!(engine.is_running());
        engine.start();
        assert!(engine.is_running());

        engine.stop();
        assert!(!engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_tick_raises_alerts_through_aggregator() {
        let aggregator = MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        // Drive the error rate over the default threshold
        for _ in 0..10 {
            aggregator.record_request("/api/users", 10, 500);
        }

        let mut engine = AlertEngine::new(
            aggregator.clone(),
            Thresholds::default(),
            Duration::from_millis(20),
        );
        engine.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.stop();

        let snapshot = aggregator.snapshot();
        assert!(snapshot
            .alerts
            .iter()
            .any(|a| a.message.contains("High error rate detected")));
    }
}
