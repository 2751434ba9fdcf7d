//! Time-series persistence interface.
//!
//! The pipeline writes one point per reading into a writer-side buffer and
//! flushes once per batch before acknowledging. Two implementations exist
//! and are selected once at process startup: [`MemoryTimeSeries`] (no
//! external store configured) and the line-protocol HTTP writer in
//! `services::influx`. There is no runtime fallback between them.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::sensors::{FieldValue, SensorBatch, SensorReading};

/// One time-series point: a reading tagged by device and animal, with each
/// value field keeping its runtime type.
#[derive(Debug, Clone)]
pub struct TelemetryPoint {
    pub measurement: String,
    pub device_id: String,
    pub animal_id: Option<String>,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryPoint {
    /// Build the point for one reading of a batch.
    pub fn from_reading(batch: &SensorBatch, reading: &SensorReading) -> Self {
        let mut fields: Vec<(String, FieldValue)> = reading
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // Deterministic field order keeps lines and assertions stable.
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            measurement: reading.sensor_type.to_string(),
            device_id: batch.device_id.clone(),
            animal_id: batch.animal_id.clone(),
            fields,
            timestamp: batch.timestamp,
        }
    }
}

/// Narrow interface over the time-series store.
#[async_trait]
pub trait TimeSeriesWriter: Send + Sync {
    /// Buffer one point. Buffered points are not durable until `flush`.
    async fn write_point(&self, point: TelemetryPoint) -> Result<(), PipelineError>;

    /// Persist everything buffered so far. The pipeline's per-batch
    /// durability point.
    async fn flush(&self) -> Result<(), PipelineError>;

    /// Writer name for logging.
    fn writer_name(&self) -> &str;
}

/// Default maximum number of flushed points retained in memory.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Capacity-bounded in-memory time-series store.
///
/// When full, the oldest flushed point is evicted before the new one is
/// inserted (ring-buffer semantics backed by `VecDeque`).
pub struct MemoryTimeSeries {
    buffer: Mutex<Vec<TelemetryPoint>>,
    flushed: Mutex<VecDeque<TelemetryPoint>>,
    capacity: usize,
}

impl MemoryTimeSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            flushed: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Number of durable (flushed) points.
    pub async fn flushed_len(&self) -> usize {
        self.flushed.lock().await.len()
    }

    /// Snapshot of all durable points, oldest first.
    pub async fn flushed_points(&self) -> Vec<TelemetryPoint> {
        self.flushed.lock().await.iter().cloned().collect()
    }

    /// Number of points buffered but not yet flushed.
    pub async fn pending_len(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

impl Default for MemoryTimeSeries {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl TimeSeriesWriter for MemoryTimeSeries {
    async fn write_point(&self, point: TelemetryPoint) -> Result<(), PipelineError> {
        self.buffer.lock().await.push(point);
        Ok(())
    }

    async fn flush(&self) -> Result<(), PipelineError> {
        let mut buffer = self.buffer.lock().await;
        let mut flushed = self.flushed.lock().await;
        for point in buffer.drain(..) {
            if flushed.len() >= self.capacity {
                flushed.pop_front();
            }
            flushed.push_back(point);
        }
        Ok(())
    }

    fn writer_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::sensors::SensorType;

    fn make_point(measurement: &str, value: f64) -> TelemetryPoint {
        TelemetryPoint {
            measurement: measurement.to_string(),
            device_id: "dev-1".to_string(),
            animal_id: Some("A1".to_string()),
            fields: vec![("value".to_string(), FieldValue::Number(value))],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn points_are_not_durable_before_flush() {
        let store = MemoryTimeSeries::new(10);
        store.write_point(make_point("HEALTH", 1.0)).await.unwrap();

        assert_eq!(store.pending_len().await, 1);
        assert_eq!(store.flushed_len().await, 0);
    }

    #[tokio::test]
    async fn flush_moves_buffered_points() {
        let store = MemoryTimeSeries::new(10);
        store.write_point(make_point("HEALTH", 1.0)).await.unwrap();
        store.write_point(make_point("DHT11", 2.0)).await.unwrap();
        store.flush().await.unwrap();

        assert_eq!(store.pending_len().await, 0);
        assert_eq!(store.flushed_len().await, 2);
    }

    #[tokio::test]
    async fn flush_evicts_oldest_at_capacity() {
        let store = MemoryTimeSeries::new(2);
        for i in 0..3 {
            store
                .write_point(make_point("HEALTH", i as f64))
                .await
                .unwrap();
        }
        store.flush().await.unwrap();

        let points = store.flushed_points().await;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].fields[0].1, FieldValue::Number(1.0));
        assert_eq!(points[1].fields[0].1, FieldValue::Number(2.0));
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_a_noop() {
        let store = MemoryTimeSeries::new(10);
        store.flush().await.unwrap();
        assert_eq!(store.flushed_len().await, 0);
    }

    #[test]
    fn point_from_reading_carries_tags_and_sorted_fields() {
        let reading = SensorReading {
            sensor_type: SensorType::Dht11,
            values: HashMap::from([
                ("temperature".to_string(), FieldValue::Number(24.0)),
                ("humidity".to_string(), FieldValue::Number(55.0)),
            ]),
        };
        let batch = SensorBatch {
            device_id: "dev-1".to_string(),
            animal_id: Some("A1".to_string()),
            readings: vec![reading.clone()],
            timestamp: Utc::now(),
        };

        let point = TelemetryPoint::from_reading(&batch, &reading);
        assert_eq!(point.measurement, "DHT11");
        assert_eq!(point.device_id, "dev-1");
        assert_eq!(point.animal_id.as_deref(), Some("A1"));
        assert_eq!(point.fields[0].0, "humidity");
        assert_eq!(point.fields[1].0, "temperature");
    }
}
