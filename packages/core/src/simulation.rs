//! Per-animal synthetic telemetry generator.
//!
//! Each started simulation runs a tokio interval task that synthesizes a
//! full sensor batch (vitals, motion, acoustics, plus fetal readings for
//! confirmed pregnancies), broadcasts the raw batch so dashboards stay
//! fresh even when storage is slow, and then feeds the batch through the
//! same ingest pipeline an external device would use.
//!
//! Invariant: at most one live timer per animal. Starting an animal twice
//! replaces the first timer; disconnecting the session that started a
//! simulation never stops it — only an explicit stop call or process
//! shutdown does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::analysis::pregnancy::gestation_band;
use crate::hub::ConnectionHub;
use crate::metrics::AppMetrics;
use crate::pipeline::IngestPipeline;
use crate::repository::{HerdRepository, PregnancyStatus};
use crate::sensors::{
    FieldValue, SensorBatch, SensorReading, SensorType, FETAL_HEART_RATE_FIELD,
};

/// Default tick interval when a start request does not name one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

pub struct SimulationEngine {
    pipeline: Arc<IngestPipeline>,
    hub: Arc<ConnectionHub>,
    repository: Arc<HerdRepository>,
    metrics: Arc<AppMetrics>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    default_interval: Duration,
}

impl SimulationEngine {
    pub fn new(
        pipeline: Arc<IngestPipeline>,
        hub: Arc<ConnectionHub>,
        repository: Arc<HerdRepository>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            pipeline,
            hub,
            repository,
            metrics,
            timers: Mutex::new(HashMap::new()),
            default_interval: DEFAULT_INTERVAL,
        }
    }

    /// Override the interval used when a start request names none.
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Start (or restart) the simulation for an animal. Idempotent: an
    /// existing timer for the same animal is aborted and replaced.
    pub fn start(&self, animal_id: &str, interval: Option<Duration>) {
        let interval = interval.unwrap_or(self.default_interval);
        let handle = tokio::spawn(run_simulation(
            animal_id.to_string(),
            interval,
            self.pipeline.clone(),
            self.hub.clone(),
            self.repository.clone(),
        ));

        let mut timers = self.timers.lock().expect("simulation timer map poisoned");
        if let Some(old) = timers.insert(animal_id.to_string(), handle) {
            old.abort();
            tracing::info!("Replaced running simulation for {}", animal_id);
        } else {
            tracing::info!(
                "Started simulation for {} (interval {:?})",
                animal_id,
                interval
            );
        }
        self.metrics.active_simulations.set(timers.len() as f64);
    }

    /// Stop the simulation for one animal. Stopping an animal with no
    /// running timer is a no-op.
    pub fn stop(&self, animal_id: &str) {
        let mut timers = self.timers.lock().expect("simulation timer map poisoned");
        if let Some(handle) = timers.remove(animal_id) {
            handle.abort();
            tracing::info!("Stopped simulation for {}", animal_id);
        }
        self.metrics.active_simulations.set(timers.len() as f64);
    }

    /// Cancel every running simulation.
    pub fn stop_all(&self) {
        let mut timers = self.timers.lock().expect("simulation timer map poisoned");
        for (animal_id, handle) in timers.drain() {
            handle.abort();
            tracing::info!("Stopped simulation for {}", animal_id);
        }
        self.metrics.active_simulations.set(0.0);
    }

    /// Animal ids with a live timer, sorted for stable status payloads.
    pub fn active(&self) -> Vec<String> {
        let timers = self.timers.lock().expect("simulation timer map poisoned");
        let mut ids: Vec<String> = timers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The `simulationStatus` event payload.
    pub fn status_event(&self) -> serde_json::Value {
        json!({ "type": "simulationStatus", "simulations": self.active() })
    }
}

async fn run_simulation(
    animal_id: String,
    interval: Duration,
    pipeline: Arc<IngestPipeline>,
    hub: Arc<ConnectionHub>,
    repository: Arc<HerdRepository>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick gives dashboards data without waiting a
    // full interval.
    loop {
        ticker.tick().await;
        tick_once(&animal_id, &pipeline, &hub, &repository).await;
    }
}

/// Execute a single simulation tick. Extracted for testability.
async fn tick_once(
    animal_id: &str,
    pipeline: &IngestPipeline,
    hub: &ConnectionHub,
    repository: &HerdRepository,
) {
    let pregnancy = match repository.pregnancy_record(animal_id).await {
        Ok(record) => record,
        Err(err) => {
            tracing::error!("Simulation record lookup failed for {}: {}", animal_id, err);
            None
        }
    };

    let batch = match &pregnancy {
        Some(record) if record.status == PregnancyStatus::Confirmed => {
            synthesize_batch(animal_id, Some(record.gestation_days))
        }
        _ => synthesize_batch(animal_id, None),
    };

    // Raw broadcast first: dashboards get the tick even if storage is slow.
    let raw = json!({
        "type": "sensorData",
        "deviceId": batch.device_id,
        "animalId": batch.animal_id,
        "readings": batch.readings,
        "timestamp": batch.timestamp,
        "simulated": true,
    });
    hub.publish(Some(animal_id), &raw).await;

    match pipeline.ingest(&batch).await {
        Ok(outcome) => hub.publish_batch(&batch, &outcome).await,
        Err(err) => {
            tracing::error!("Simulated batch rejected for {}: {}", animal_id, err);
        }
    }
}

/// Build one full synthetic batch with bounded jitter around species
/// baselines. `gestation_days` present means the pregnancy is confirmed and
/// a PREGNANCY reading centred in the expected band is included.
fn synthesize_batch(animal_id: &str, gestation_days: Option<i64>) -> SensorBatch {
    let mut rng = rand::thread_rng();

    let mut readings = vec![
        // Collar-mounted DHT11 reads body-surface temperature, so its rows
        // feed the same vitals history as the HEALTH sensor.
        reading(
            SensorType::Dht11,
            &[
                ("temperature", jittered(&mut rng, 38.5, 0.6)),
                ("humidity", jittered(&mut rng, 60.0, 15.0)),
            ],
        ),
        reading(
            SensorType::Mpu6050,
            &[
                ("accelX", jittered(&mut rng, 0.0, 1.5)),
                ("accelY", jittered(&mut rng, 0.0, 1.5)),
                ("accelZ", jittered(&mut rng, 9.8, 0.5)),
                ("gyroX", jittered(&mut rng, 0.0, 30.0)),
                ("gyroY", jittered(&mut rng, 0.0, 30.0)),
                ("gyroZ", jittered(&mut rng, 0.0, 30.0)),
                ("temperature", jittered(&mut rng, 30.0, 3.0)),
            ],
        ),
        reading(
            SensorType::Microphone,
            &[
                ("audioLevel", jittered(&mut rng, 45.0, 15.0)),
                ("frequency", jittered(&mut rng, 300.0, 150.0)),
            ],
        ),
        reading(
            SensorType::Health,
            &[
                ("heart_rate", jittered(&mut rng, 72.0, 10.0)),
                ("temperature", jittered(&mut rng, 38.6, 0.5)),
                ("activity", jittered(&mut rng, 6.0, 2.0)),
            ],
        ),
    ];

    if let Some(days) = gestation_days {
        let band = gestation_band(days);
        let centre = (band.min + band.max) / 2.0;
        readings.push(reading(
            SensorType::Pregnancy,
            &[(FETAL_HEART_RATE_FIELD, jittered(&mut rng, centre, 8.0))],
        ));
    }

    SensorBatch {
        device_id: format!("sim-{}", animal_id),
        animal_id: Some(animal_id.to_string()),
        readings,
        timestamp: Utc::now(),
    }
}

fn reading(sensor_type: SensorType, values: &[(&str, f64)]) -> SensorReading {
    SensorReading {
        sensor_type,
        values: values
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Number(*v)))
            .collect(),
    }
}

fn jittered(rng: &mut impl Rng, base: f64, spread: f64) -> f64 {
    base + rng.gen_range(-spread..=spread)
}
