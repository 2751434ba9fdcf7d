//! Batch ingestion pipeline.
//!
//! One `ingest` call runs: full-batch validation, per-reading time-series
//! writes, relational vitals rows with synchronous anomaly assessment,
//! fetal monitoring rows with pregnancy analysis, and a final time-series
//! flush before the result is returned.
//!
//! The two stores are independent failure domains: a time-series error is
//! logged and never blocks the relational work, and vice versa. Only
//! validation aborts the batch — and it runs before any write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::analysis::types::{AnomalyReport, FetalAssessment};
use crate::analysis::{AnomalyDetector, PregnancyAnalyzer};
use crate::cache::TtlCache;
use crate::error::PipelineError;
use crate::metrics::AppMetrics;
use crate::repository::{
    HealthSample, HerdRepository, PregnancyRecord, PregnancyStat, PregnancyStatus,
};
use crate::sensors::{self, SensorBatch, SensorReading, SensorType};
use crate::tsdb::{TelemetryPoint, TimeSeriesWriter};

/// How long a pregnancy-record lookup stays cached. Records change on a
/// veterinary timescale; thirty seconds trades one query per batch for
/// bounded staleness.
const PREGNANCY_CACHE_TTL: Duration = Duration::from_secs(30);

/// Aggregate result of one ingested batch.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub anomaly_detected: bool,
    pub fetal_health: Option<FetalAssessment>,
    /// Per-sample reports for dashboard enrichment.
    pub anomaly_reports: Vec<AnomalyReport>,
}

pub struct IngestPipeline {
    repository: Arc<HerdRepository>,
    tsdb: Arc<dyn TimeSeriesWriter>,
    detector: AnomalyDetector,
    analyzer: PregnancyAnalyzer,
    pregnancy_cache: Mutex<TtlCache<Option<PregnancyRecord>>>,
    metrics: Arc<AppMetrics>,
}

impl IngestPipeline {
    pub fn new(
        repository: Arc<HerdRepository>,
        tsdb: Arc<dyn TimeSeriesWriter>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            detector: AnomalyDetector::new(repository.clone()),
            analyzer: PregnancyAnalyzer::new(repository.clone()),
            repository,
            tsdb,
            pregnancy_cache: Mutex::new(TtlCache::new(PREGNANCY_CACHE_TTL)),
            metrics,
        }
    }

    /// Ingest one batch. Validation failures abort before any write;
    /// persistence failures are recovered per store.
    pub async fn ingest(&self, batch: &SensorBatch) -> Result<IngestOutcome, PipelineError> {
        if let Err(err) = sensors::validate_batch(&batch.readings) {
            self.metrics.validation_failures_total.inc();
            return Err(err);
        }

        let mut outcome = IngestOutcome::default();

        // Time-series writes, one point per reading in array order.
        for reading in &batch.readings {
            let point = TelemetryPoint::from_reading(batch, reading);
            if let Err(err) = self.tsdb.write_point(point).await {
                self.metrics.persistence_errors_total.inc();
                tracing::error!(
                    "Time-series write failed for device {}: {}",
                    batch.device_id,
                    err
                );
            }
        }

        if let Some(animal_id) = &batch.animal_id {
            self.record_vitals(animal_id, batch, &mut outcome).await;
            self.record_fetal_health(animal_id, batch, &mut outcome).await;
        }

        // Per-batch durability point for the buffered time-series writes.
        if let Err(err) = self.tsdb.flush().await {
            self.metrics.persistence_errors_total.inc();
            tracing::error!(
                "Time-series flush failed for device {}: {}",
                batch.device_id,
                err
            );
        }

        self.metrics.batches_ingested_total.inc();
        if outcome.anomaly_detected {
            self.metrics.anomalies_detected_total.inc();
        }

        Ok(outcome)
    }

    /// Append a vitals row per qualifying reading and assess each one.
    async fn record_vitals(
        &self,
        animal_id: &str,
        batch: &SensorBatch,
        outcome: &mut IngestOutcome,
    ) {
        for reading in &batch.readings {
            if !matches!(reading.sensor_type, SensorType::Dht11 | SensorType::Health) {
                continue;
            }

            let (temperature, heart_rate, activity) = vitals_of(reading);
            if temperature.is_none() && heart_rate.is_none() && activity.is_none() {
                continue;
            }

            let sample = HealthSample {
                animal_id: animal_id.to_string(),
                recorded_at: batch.timestamp,
                temperature,
                heart_rate,
                activity,
            };

            if let Err(err) = self.repository.insert_health_sample(&sample).await {
                self.metrics.persistence_errors_total.inc();
                tracing::error!("Health sample insert failed for {}: {}", animal_id, err);
            }

            match self.detector.assess(animal_id, &sample).await {
                Ok(report) => {
                    outcome.anomaly_detected |= report.is_anomaly;
                    outcome.anomaly_reports.push(report);
                }
                Err(err) => {
                    self.metrics.persistence_errors_total.inc();
                    tracing::error!("Anomaly assessment failed for {}: {}", animal_id, err);
                }
            }
        }
    }

    /// Append a fetal monitoring row and run the pregnancy analyzer when
    /// the batch carries a fetal heart rate and the pregnancy is confirmed.
    async fn record_fetal_health(
        &self,
        animal_id: &str,
        batch: &SensorBatch,
        outcome: &mut IngestOutcome,
    ) {
        let Some(fetal_heart_rate) = batch.fetal_heart_rate() else {
            return;
        };

        let record = match self.pregnancy_record(animal_id).await {
            Ok(record) => record,
            Err(err) => {
                self.metrics.persistence_errors_total.inc();
                tracing::error!("Pregnancy record lookup failed for {}: {}", animal_id, err);
                return;
            }
        };

        let Some(record) = record else {
            return;
        };
        if record.status != PregnancyStatus::Confirmed {
            return;
        }

        let vitals = batch
            .readings
            .iter()
            .filter(|r| matches!(r.sensor_type, SensorType::Health))
            .map(vitals_of)
            .next()
            .unwrap_or((None, None, None));

        let stat = PregnancyStat {
            animal_id: animal_id.to_string(),
            recorded_at: batch.timestamp,
            fetal_heart_rate,
            temperature: vitals.0,
            heart_rate: vitals.1,
            activity: vitals.2,
            notes: None,
        };

        if let Err(err) = self.repository.insert_pregnancy_stat(&stat).await {
            self.metrics.persistence_errors_total.inc();
            tracing::error!("Pregnancy stat insert failed for {}: {}", animal_id, err);
        }

        match self
            .analyzer
            .assess(animal_id, fetal_heart_rate, Some(&record))
            .await
        {
            // Last assessment wins when a batch carries several readings.
            Ok(assessment) => outcome.fetal_health = Some(assessment),
            Err(err) => {
                self.metrics.persistence_errors_total.inc();
                tracing::error!("Pregnancy assessment failed for {}: {}", animal_id, err);
            }
        }
    }

    async fn pregnancy_record(
        &self,
        animal_id: &str,
    ) -> Result<Option<PregnancyRecord>, PipelineError> {
        {
            let cache = self.pregnancy_cache.lock().await;
            if let Some(cached) = cache.get(animal_id) {
                return Ok(cached);
            }
        }

        let record = self.repository.pregnancy_record(animal_id).await?;
        self.pregnancy_cache
            .lock()
            .await
            .set(animal_id, record.clone());
        Ok(record)
    }
}

fn vitals_of(reading: &SensorReading) -> (Option<f64>, Option<f64>, Option<f64>) {
    (
        reading.numeric("temperature"),
        reading.numeric("heart_rate"),
        reading.numeric("activity"),
    )
}
