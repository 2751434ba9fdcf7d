//! Session registry and dashboard fan-out.
//!
//! Every long-lived connection (dashboard, device, simulator) registers a
//! session here; each session owns an unbounded channel drained by its
//! socket writer task. Broadcast delivery is filtered per dashboard
//! subscription: a session with no filter is a firehose, a session
//! monitoring one animal only sees that animal's events.
//!
//! The registry is the shared mutable state of the hub and is guarded by an
//! `RwLock`; dead sessions found during a broadcast are swept afterwards
//! under the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};

use crate::metrics::AppMetrics;
use crate::pipeline::IngestOutcome;
use crate::sensors::SensorBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Dashboard,
    Device,
    Simulator,
}

/// One registered connection. Destroyed on disconnect, never persisted.
pub struct Session {
    pub id: u64,
    pub role: SessionRole,
    pub device_id: Option<String>,
    pub monitoring_animal_id: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl Session {
    fn wants(&self, animal_id: Option<&str>) -> bool {
        if self.role != SessionRole::Dashboard {
            return false;
        }
        match (&self.monitoring_animal_id, animal_id) {
            (None, _) => true,
            (Some(filter), Some(animal_id)) => filter == animal_id,
            (Some(_), None) => false,
        }
    }
}

pub struct ConnectionHub {
    sessions: RwLock<HashMap<u64, Session>>,
    next_id: AtomicU64,
    metrics: Arc<AppMetrics>,
}

impl ConnectionHub {
    pub fn new(metrics: Arc<AppMetrics>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Register a session and return its id. `tx` is the channel drained by
    /// the session's socket writer.
    pub async fn register(
        &self,
        role: SessionRole,
        device_id: Option<String>,
        monitoring_animal_id: Option<String>,
        tx: mpsc::UnboundedSender<String>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            Session {
                id,
                role,
                device_id,
                monitoring_animal_id,
                tx,
            },
        );
        self.metrics.active_sessions.set(sessions.len() as f64);
        id
    }

    /// Remove a session. Disconnection has no other side effect — running
    /// simulations are left alone.
    pub async fn unregister(&self, id: u64) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        self.metrics.active_sessions.set(sessions.len() as f64);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Deliver an event to dashboard sessions subscribed to `animal_id`
    /// (firehose sessions always match; mismatching filters never do).
    pub async fn publish(&self, animal_id: Option<&str>, event: &Value) {
        let payload = event.to_string();
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for session in sessions.values() {
                if !session.wants(animal_id) {
                    continue;
                }
                if session.tx.send(payload.clone()).is_err() {
                    dead.push(session.id);
                } else {
                    self.metrics.broadcast_events_total.inc();
                }
            }
        }
        self.sweep(dead).await;
    }

    /// Deliver an event to every dashboard session, ignoring filters.
    /// Used for simulation-status changes.
    pub async fn publish_global(&self, event: &Value) {
        let payload = event.to_string();
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for session in sessions.values() {
                if session.role != SessionRole::Dashboard {
                    continue;
                }
                if session.tx.send(payload.clone()).is_err() {
                    dead.push(session.id);
                } else {
                    self.metrics.broadcast_events_total.inc();
                }
            }
        }
        self.sweep(dead).await;
    }

    /// Broadcast the enriched form of an ingested batch, scoped to the
    /// batch's animal.
    pub async fn publish_batch(&self, batch: &SensorBatch, outcome: &IngestOutcome) {
        let event = json!({
            "type": "sensorData",
            "deviceId": batch.device_id,
            "animalId": batch.animal_id,
            "readings": batch.readings,
            "timestamp": batch.timestamp,
            "anomalyDetected": outcome.anomaly_detected,
            "anomalies": outcome.anomaly_reports,
            "fetalHealthData": outcome.fetal_health,
        });
        self.publish(batch.animal_id.as_deref(), &event).await;
    }

    async fn sweep(&self, dead: Vec<u64>) {
        if dead.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().await;
        for id in dead {
            sessions.remove(&id);
        }
        self.metrics.active_sessions.set(sessions.len() as f64);
    }
}
