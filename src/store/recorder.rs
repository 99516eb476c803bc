//! Persistence listener
//!
//! Subscribes to the event bus and translates metric events into store
//! inserts. Each event is handled in isolation: a failed or irrelevant
//! event never blocks the stream, and falling behind the bus only costs
//! the recorder the oldest events, never the producers any time.

use super::TimeSeriesStore;
use crate::bus::EventBus;
use crate::events::MetricEvent;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Bus subscriber writing events into a `TimeSeriesStore`
pub struct Recorder {
    handle: JoinHandle<()>,
}

impl Recorder {
    /// Start recording bus events into the store
    pub fn start(bus: &EventBus, store: Arc<dyn TimeSeriesStore>) -> Self {
        let mut receiver = bus.subscribe();
        let handle = tokio::spawn(async move {
            info!("persistence recorder started");
            loop {
                match receiver.recv().await {
                    Ok(event) => record(store.as_ref(), event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("persistence recorder lagged, {} events dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { handle }
    }

    /// Stop recording; already-received events are not flushed further
    pub fn stop(self) {
        self.handle.abort();
    }
}

fn record(store: &dyn TimeSeriesStore, event: MetricEvent) {
    match event {
        MetricEvent::ApiRequest(request) => {
            store.insert_request(
                &request.endpoint,
                request.status,
                request.duration_ms,
                Utc::now(),
            );
        }
        MetricEvent::LogAppended(entry) => store.insert_log(&entry),
        MetricEvent::AlertChanged(alert) => store.insert_alert(&alert),
        MetricEvent::ServiceChanged(service) => {
            store.insert_service_check(
                &service.name,
                service.status,
                service.response_time_ms,
                service.last_checked,
            );
        }
        MetricEvent::ErrorSnapshot(snapshot) => store.insert_error_snapshot(&snapshot),
        // Derived-state events are not persisted row by row
        MetricEvent::StatsChanged(_)
        | MetricEvent::EndpointChanged(_)
        | MetricEvent::DbChanged(_)
        | MetricEvent::ResourcesChanged(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::aggregator::{AggregatorConfig, MetricsAggregator};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn test_recorder_persists_requests_and_logs() {
        let bus = EventBus::new();
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::start(&bus, store.clone());

        let aggregator = MetricsAggregator::new(bus, AggregatorConfig::default());
        aggregator.record_request("/api/orders", 600, 503);

        // Give the recorder task a moment to drain the bus
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(store.request_count(), 1);
        let series = store.error_rate_series(
            "/api/orders",
            Duration::hours(1),
            Duration::minutes(60),
        );
        assert_eq!(series[0].errors, 1);

        recorder.stop();
    }

    #[tokio::test]
    async fn test_recorder_persists_error_snapshots() {
        let bus = EventBus::new();
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::start(&bus, store.clone());

        let aggregator = MetricsAggregator::new(bus, AggregatorConfig::default());
        aggregator.record_error_snapshot(crate::events::ErrorSnapshot {
            id: "s-1".to_string(),
            source: "api".to_string(),
            endpoint: "/api/users".to_string(),
            method: "GET".to_string(),
            status: 500,
            request_headers: Default::default(),
            request_body: None,
            response_snippet: String::new(),
            trace_id: Some("trace-1".to_string()),
            timestamp: Utc::now(),
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let snapshots = store.error_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].trace_id.as_deref(), Some("trace-1"));

        recorder.stop();
    }
}
