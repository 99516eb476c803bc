//! Synthetic traffic generator
//!
//! Drives the aggregator's ingestion operations at a configurable rate so
//! the dashboard has data without real traffic. The status and latency
//! distributions are rough approximations of a small production API.

use crate::aggregator::MetricsAggregator;
use log::info;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const ENDPOINTS: [&str; 7] = [
    "/api/users",
    "/api/products",
    "/api/orders",
    "/api/auth",
    "/api/payments",
    "/api/stream",
    "/api/thresholds",
];

const QUERY_SAMPLES: [&str; 5] = [
    "SELECT * FROM users WHERE id = $1",
    "SELECT * FROM products ORDER BY created_at DESC LIMIT 20",
    "UPDATE orders SET status = $1 WHERE id = $2",
    "INSERT INTO audit_logs (message, level) VALUES ($1, $2)",
    "SELECT COUNT(*) FROM orders WHERE status = $1",
];

/// Traffic rates per second
#[derive(Debug, Clone, Copy)]
pub struct SimulatorOptions {
    pub rps: u64,
    pub db_qps: u64,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self { rps: 5, db_qps: 2 }
    }
}

/// Generates API and database traffic against the aggregator
pub struct TrafficSimulator {
    aggregator: MetricsAggregator,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TrafficSimulator {
    pub fn new(aggregator: MetricsAggregator) -> Self {
        Self {
            aggregator,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start generating traffic; idempotent
    pub fn start(&self, options: SimulatorOptions) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "traffic simulator started (rps={}, db_qps={})",
            options.rps, options.db_qps
        );
        let mut handles = self.handles.lock().unwrap();

        let aggregator = self.aggregator.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                for _ in 0..options.rps {
                    let (endpoint, duration, status) = {
                        let mut rng = rand::thread_rng();
                        let endpoint = ENDPOINTS[rng.gen_range(0..ENDPOINTS.len())];
                        let duration = rng.gen_range(50..650u64);
                        let roll: f64 = rng.gen();
                        let status = if roll < 0.03 {
                            500
                        } else if roll < 0.10 {
                            404
                        } else if roll < 0.14 {
                            401
                        } else {
                            200
                        };
                        (endpoint, duration, status)
                    };
                    aggregator.record_request(endpoint, duration, status);
                }
            }
        }));

        let aggregator = self.aggregator.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                for _ in 0..options.db_qps {
                    let (query, duration) = {
                        let mut rng = rand::thread_rng();
                        let query = QUERY_SAMPLES[rng.gen_range(0..QUERY_SAMPLES.len())];
                        let duration = if rng.gen_bool(0.15) {
                            rng.gen_range(300.0..800.0)
                        } else {
                            rng.gen_range(20.0..140.0)
                        };
                        (query, duration)
                    };
                    aggregator.record_database_query(query, duration);
                }
            }
        }));
    }

    /// Stop generating traffic; idempotent
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("traffic simulator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for TrafficSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn test_simulator_drives_the_aggregator() {
        let aggregator = MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        let simulator = TrafficSimulator::new(aggregator.clone());

        simulator.start(SimulatorOptions { rps: 50, db_qps: 10 });
        // The first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        simulator.stop();

        let snapshot = aggregator.snapshot();
        assert!(snapshot.stats.total_requests > 0);
        assert!(snapshot.database.queries.total > 0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let aggregator = MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        let simulator = TrafficSimulator::new(aggregator);

        simulator.start(SimulatorOptions::default());
        simulator.start(SimulatorOptions::default());
        assert!(simulator.is_running());

        simulator.stop();
        assert!(!simulator.is_running());
        simulator.stop();
        assert!(!simulator.is_running());
        assert_eq!(simulator.handles.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_no_traffic_after_stop() {
        let aggregator = MetricsAggregator::new(EventBus::new(), AggregatorConfig::default());
        let simulator = TrafficSimulator::new(aggregator.clone());

        simulator.start(SimulatorOptions { rps: 50, db_qps: 0 });
        tokio::time::sleep(Duration::from_millis(50)).await;
        simulator.stop();

        let count_at_stop = aggregator.snapshot().stats.total_requests;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(aggregator.snapshot().stats.total_requests, count_at_stop);
    }
}
