//! Realtime fan-out to streaming clients
//!
//! Relays bus events to any number of connected clients over bounded
//! per-client channels. A slow client loses frames (try-send, never
//! block), a disconnected client is pruned, and a periodic heartbeat both
//! keeps live connections warm and sweeps out dead ones.

use crate::bus::EventBus;
use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default heartbeat period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
/// Frames buffered per client before drops kick in
const CLIENT_BUFFER: usize = 64;

/// One named event pushed to a streaming client
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Frame {
    pub event: String,
    pub data: serde_json::Value,
}

type Clients = Arc<Mutex<HashMap<u64, mpsc::Sender<Frame>>>>;

/// Fans bus events out to connected streaming clients
pub struct Broadcaster {
    clients: Clients,
    next_id: AtomicU64,
    relay: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Broadcaster {
    /// Start relaying bus events, with a heartbeat at the given period
    pub fn start(bus: &EventBus, heartbeat_period: Duration) -> Self {
        let clients: Clients = Arc::new(Mutex::new(HashMap::new()));

        let relay_clients = Arc::clone(&clients);
        let mut receiver = bus.subscribe();
        let relay = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let frame = Frame {
                            event: event.name().to_string(),
                            data: event.payload(),
                        };
                        push_frame(&relay_clients, frame);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!("broadcaster lagged, {} events dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let heartbeat_clients = Arc::clone(&clients);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let frame = Frame {
                    event: "ping".to_string(),
                    data: json!(Utc::now().timestamp_millis()),
                };
                push_frame(&heartbeat_clients, frame);
            }
        });

        info!("realtime broadcaster started");
        Self {
            clients,
            next_id: AtomicU64::new(1),
            relay: Some(relay),
            heartbeat: Some(heartbeat),
        }
    }

    /// Attach a new streaming client
    ///
    /// The first frame on the channel confirms the connection. Dropping
    /// the receiver disconnects the client; it is pruned on the next push.
    pub fn subscribe(&self) -> mpsc::Receiver<Frame> {
        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);
        let _ = sender.try_send(Frame {
            event: "connected".to_string(),
            data: json!({ "ok": true, "ts": Utc::now().timestamp_millis() }),
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().unwrap().insert(id, sender);
        debug!("streaming client {} connected", id);
        receiver
    }

    /// Number of currently attached clients
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Stop relaying and drop all clients; idempotent
    pub fn stop(&mut self) {
        if let Some(handle) = self.relay.take() {
            handle.abort();
        }
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        self.clients.lock().unwrap().clear();
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deliver a frame to every client, dropping it for full buffers and
/// pruning closed channels
fn push_frame(clients: &Clients, frame: Frame) {
    let mut clients = clients.lock().unwrap();
    clients.retain(|id, sender| match sender.try_send(frame.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("client {} is slow, dropping frame", id);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("client {} disconnected, pruning", id);
            false
        }
    });
}
