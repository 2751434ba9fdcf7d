//! Adaptive per-animal vitals outlier classifier.
//!
//! Normal bands are derived from the trailing window of recent health
//! samples (population mean ± 2σ); an animal with no history falls back to
//! fixed species defaults. The detector is streaming: each assessed sample
//! becomes part of the next sample's window.

use std::sync::Arc;

use chrono::Utc;

use crate::analysis::types::{AnomalyEntry, AnomalyReport, MetricBand, Severity};
use crate::error::PipelineError;
use crate::repository::{HealthSample, HerdRepository};

/// Number of recent samples considered when deriving adaptive bands.
pub const HISTORY_WINDOW: i64 = 7;

const DEFAULT_TEMPERATURE_BAND: MetricBand = MetricBand { min: 38.0, max: 39.5 };
const DEFAULT_HEART_RATE_BAND: MetricBand = MetricBand { min: 60.0, max: 90.0 };
const DEFAULT_ACTIVITY_BAND: MetricBand = MetricBand { min: 3.0, max: 9.0 };

// Minimum standard deviation per metric. A constant history would collapse
// mean ± 2σ to a point; the floor keeps the band adaptive (centred on the
// observed mean) without flagging measurement-resolution noise.
const MIN_STDDEV_TEMPERATURE: f64 = 0.25;
const MIN_STDDEV_HEART_RATE: f64 = 5.0;
const MIN_STDDEV_ACTIVITY: f64 = 1.0;

const ACTIVITY_SCALE: MetricBand = MetricBand { min: 0.0, max: 10.0 };

pub struct AnomalyDetector {
    repository: Arc<HerdRepository>,
}

impl AnomalyDetector {
    pub fn new(repository: Arc<HerdRepository>) -> Self {
        Self { repository }
    }

    /// Assess one vitals sample against the animal's recent history.
    ///
    /// The window is the up-to-seven samples recorded strictly before this
    /// one, so the sample never scores against itself.
    pub async fn assess(
        &self,
        animal_id: &str,
        sample: &HealthSample,
    ) -> Result<AnomalyReport, PipelineError> {
        let history = self
            .repository
            .health_samples_before(animal_id, sample.recorded_at, HISTORY_WINDOW)
            .await?;

        Ok(assess_against_history(animal_id, sample, &history))
    }
}

/// Pure classification against an already-fetched window. Extracted so the
/// band math is testable without a database.
pub fn assess_against_history(
    animal_id: &str,
    sample: &HealthSample,
    history: &[HealthSample],
) -> AnomalyReport {
    let mut anomalies = Vec::new();
    let mut weight = 0.0;

    if let Some(temperature) = sample.temperature {
        let band = derive_band(
            history.iter().filter_map(|s| s.temperature),
            MIN_STDDEV_TEMPERATURE,
            DEFAULT_TEMPERATURE_BAND,
            None,
        );
        if temperature > band.max {
            weight += 2.0;
            anomalies.push(entry("temperature", temperature, &band, Severity::High, "above"));
        } else if temperature < band.min {
            weight += 1.0;
            anomalies.push(entry("temperature", temperature, &band, Severity::Medium, "below"));
        }
    }

    if let Some(heart_rate) = sample.heart_rate {
        let band = derive_band(
            history.iter().filter_map(|s| s.heart_rate),
            MIN_STDDEV_HEART_RATE,
            DEFAULT_HEART_RATE_BAND,
            None,
        );
        if heart_rate > band.max {
            weight += 2.0;
            anomalies.push(entry("heart_rate", heart_rate, &band, Severity::High, "above"));
        } else if heart_rate < band.min {
            weight += 1.0;
            anomalies.push(entry("heart_rate", heart_rate, &band, Severity::Medium, "below"));
        }
    }

    if let Some(activity) = sample.activity {
        let band = derive_band(
            history.iter().filter_map(|s| s.activity),
            MIN_STDDEV_ACTIVITY,
            DEFAULT_ACTIVITY_BAND,
            Some(ACTIVITY_SCALE),
        );
        if activity > band.max {
            // Elevated activity alone is informational, not alarming.
            weight += 0.5;
            anomalies.push(entry("activity", activity, &band, Severity::Low, "above"));
        } else if activity < band.min {
            weight += 1.0;
            anomalies.push(entry("activity", activity, &band, Severity::Medium, "below"));
        }
    }

    let overall_severity = if weight > 2.0 {
        Severity::High
    } else if weight > 1.0 {
        Severity::Medium
    } else {
        Severity::Low
    };

    AnomalyReport {
        animal_id: animal_id.to_string(),
        timestamp: Utc::now(),
        is_anomaly: !anomalies.is_empty(),
        overall_severity,
        anomalies,
    }
}

fn entry(
    metric: &str,
    value: f64,
    band: &MetricBand,
    severity: Severity,
    direction: &str,
) -> AnomalyEntry {
    AnomalyEntry {
        metric: metric.to_string(),
        value,
        normal_range: band.as_text(),
        severity,
        message: format!(
            "{} {:.1} is {} the normal range {}",
            metric,
            value,
            direction,
            band.as_text()
        ),
    }
}

/// Band derivation: population mean ± 2σ over the metric's history values,
/// with a minimum σ floor; falls back to the default band when the window
/// holds no values for this metric.
fn derive_band(
    values: impl Iterator<Item = f64>,
    min_stddev: f64,
    default: MetricBand,
    clamp: Option<MetricBand>,
) -> MetricBand {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return default;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt().max(min_stddev);

    let mut band = MetricBand::new(mean - 2.0 * stddev, mean + 2.0 * stddev);
    if let Some(scale) = clamp {
        band.min = band.min.max(scale.min);
        band.max = band.max.min(scale.max);
    }
    band
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::db::create_pool;

    fn sample(temperature: f64, heart_rate: f64, activity: f64) -> HealthSample {
        HealthSample {
            animal_id: "A1".to_string(),
            recorded_at: Utc::now(),
            temperature: Some(temperature),
            heart_rate: Some(heart_rate),
            activity: Some(activity),
        }
    }

    fn history_of(temperatures: &[f64]) -> Vec<HealthSample> {
        temperatures
            .iter()
            .enumerate()
            .map(|(i, t)| HealthSample {
                animal_id: "A1".to_string(),
                recorded_at: Utc::now() - Duration::minutes((i as i64 + 1) * 10),
                temperature: Some(*t),
                heart_rate: Some(72.0),
                activity: Some(6.0),
            })
            .collect()
    }

    // ---- default bands ----

    #[test]
    fn no_history_uses_default_bands_and_flags_high_temperature() {
        let report = assess_against_history("A1", &sample(40.5, 75.0, 7.0), &[]);

        assert!(report.is_anomaly);
        assert_eq!(report.anomalies.len(), 1);
        let temp = &report.anomalies[0];
        assert_eq!(temp.metric, "temperature");
        assert_eq!(temp.severity, Severity::High);
        assert_eq!(temp.normal_range, "38.0-39.5");
    }

    #[test]
    fn no_history_normal_vitals_produce_no_entries() {
        let report = assess_against_history("A1", &sample(38.8, 75.0, 6.0), &[]);
        assert!(!report.is_anomaly);
        assert!(report.anomalies.is_empty());
        assert_eq!(report.overall_severity, Severity::Low);
    }

    #[test]
    fn low_heart_rate_is_medium_severity() {
        let report = assess_against_history(
            "A1",
            &HealthSample {
                heart_rate: Some(45.0),
                ..sample(38.8, 45.0, 6.0)
            },
            &[],
        );
        let hr = report
            .anomalies
            .iter()
            .find(|a| a.metric == "heart_rate")
            .unwrap();
        assert_eq!(hr.severity, Severity::Medium);
    }

    #[test]
    fn elevated_activity_is_low_severity() {
        let report = assess_against_history("A1", &sample(38.8, 75.0, 9.9), &[]);
        let entry = &report.anomalies[0];
        assert_eq!(entry.metric, "activity");
        assert_eq!(entry.severity, Severity::Low);
        assert_eq!(report.overall_severity, Severity::Low);
    }

    #[test]
    fn missing_metrics_are_skipped() {
        let report = assess_against_history(
            "A1",
            &HealthSample {
                animal_id: "A1".to_string(),
                recorded_at: Utc::now(),
                temperature: Some(40.5),
                heart_rate: None,
                activity: None,
            },
            &[],
        );
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].metric, "temperature");
    }

    // ---- adaptive bands ----

    #[test]
    fn adaptive_band_follows_history_mean() {
        // History centred near 39.8 — a 40.2 reading is unremarkable for
        // this animal even though it exceeds the species default.
        let history = history_of(&[39.7, 39.8, 39.9, 39.8, 39.7, 39.9, 39.8]);
        let report = assess_against_history("A1", &sample(40.2, 72.0, 6.0), &history);
        assert!(report.anomalies.iter().all(|a| a.metric != "temperature"));
    }

    #[test]
    fn constant_history_does_not_flag_measurement_noise() {
        let history = history_of(&[38.5; 7]);
        let report = assess_against_history("A1", &sample(38.51, 72.0, 6.0), &history);
        assert!(
            !report.is_anomaly,
            "σ=0 history must not flag a 0.01 °C excursion: {:?}",
            report.anomalies
        );
    }

    #[test]
    fn constant_history_still_flags_a_real_excursion() {
        let history = history_of(&[38.5; 7]);
        // 2 × the 0.25 °C floor above the mean is the edge; 39.1 is out.
        let report = assess_against_history("A1", &sample(39.1, 72.0, 6.0), &history);
        let temp = report
            .anomalies
            .iter()
            .find(|a| a.metric == "temperature")
            .expect("temperature entry missing");
        assert_eq!(temp.severity, Severity::High);
    }

    #[test]
    fn activity_band_is_clamped_to_scale() {
        let history: Vec<HealthSample> = (0..7)
            .map(|i| HealthSample {
                animal_id: "A1".to_string(),
                recorded_at: Utc::now() - Duration::minutes((i + 1) * 10),
                temperature: None,
                heart_rate: None,
                activity: Some(9.0),
            })
            .collect();

        // mean 9.0, σ floor 1.0 → raw band [7, 11], clamped to [7, 10].
        let report = assess_against_history(
            "A1",
            &HealthSample {
                animal_id: "A1".to_string(),
                recorded_at: Utc::now(),
                temperature: None,
                heart_rate: None,
                activity: Some(10.0),
            },
            &history,
        );
        assert!(!report.is_anomaly);
    }

    // ---- overall severity ----

    #[test]
    fn summed_weights_above_two_escalate_to_high() {
        // High temperature (2.0) + low heart rate (1.0) = 3.0 > 2.
        let report = assess_against_history("A1", &sample(40.5, 45.0, 6.0), &[]);
        assert_eq!(report.overall_severity, Severity::High);
    }

    #[test]
    fn single_high_entry_alone_is_medium_overall() {
        // Weight 2.0 is not strictly greater than 2.
        let report = assess_against_history("A1", &sample(40.5, 75.0, 6.0), &[]);
        assert_eq!(report.overall_severity, Severity::Medium);
    }

    #[test]
    fn two_medium_entries_are_medium_overall() {
        // Low temperature (1.0) + low activity (1.0) = 2.0 → medium.
        let report = assess_against_history("A1", &sample(37.0, 75.0, 1.0), &[]);
        assert_eq!(report.overall_severity, Severity::Medium);
        assert_eq!(report.anomalies.len(), 2);
    }

    // ---- detector over the database ----

    #[tokio::test]
    async fn detector_uses_persisted_history() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = Arc::new(HerdRepository::new(pool));
        let detector = AnomalyDetector::new(repo.clone());

        for i in 0..7 {
            repo.insert_health_sample(&HealthSample {
                animal_id: "A1".to_string(),
                recorded_at: Utc::now() - Duration::minutes((i + 1) * 10),
                temperature: Some(38.5),
                heart_rate: Some(72.0),
                activity: Some(6.0),
            })
            .await
            .unwrap();
        }

        let report = detector
            .assess("A1", &sample(38.51, 72.0, 6.0))
            .await
            .unwrap();
        assert!(!report.is_anomaly);
    }
}
