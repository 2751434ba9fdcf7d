//! Gestation-aware fetal heart-rate assessment with trend analysis.
//!
//! The expected fetal heart-rate band narrows as gestation advances; an
//! observation is judged against the band for the animal's recorded
//! gestation day, then the recent monitoring window is scanned for a trend
//! that can escalate the alert.

use std::sync::Arc;

use crate::analysis::types::{
    DueDateEstimate, FetalAlert, FetalAssessment, FetalStatus, FetalTrend, MetricBand, Severity,
    TrendDirection,
};
use crate::error::PipelineError;
use crate::repository::{HerdRepository, PregnancyRecord, PregnancyStatus};

/// Bovine gestation length in days, used for due-date estimation.
pub const GESTATION_LENGTH_DAYS: i64 = 285;

/// Number of recent monitoring rows considered for the trend.
pub const TREND_WINDOW: i64 = 7;

/// Minimum rows required before a trend is reported at all.
pub const TREND_MIN_SAMPLES: usize = 3;

/// Slope magnitude (bpm/day) above which the trend is directional.
pub const TREND_SLOPE_THRESHOLD: f64 = 3.0;

/// Margin (bpm) inside either band edge that downgrades "normal" to
/// "monitor".
const BORDERLINE_MARGIN_BPM: f64 = 5.0;

/// Expected fetal heart-rate band for a gestation day.
pub fn gestation_band(gestation_days: i64) -> MetricBand {
    match gestation_days {
        d if d < 60 => MetricBand::new(165.0, 190.0),
        d if d < 120 => MetricBand::new(160.0, 185.0),
        d if d < 180 => MetricBand::new(150.0, 180.0),
        d if d < 240 => MetricBand::new(140.0, 175.0),
        _ => MetricBand::new(130.0, 165.0),
    }
}

/// Due-date variance (days) by gestation stage: estimates tighten as the
/// pregnancy advances.
fn due_date_variance(gestation_days: i64) -> i64 {
    match gestation_days {
        d if d < 90 => 14,
        d if d < 180 => 10,
        d if d < 240 => 7,
        _ => 5,
    }
}

pub struct PregnancyAnalyzer {
    repository: Arc<HerdRepository>,
}

impl PregnancyAnalyzer {
    pub fn new(repository: Arc<HerdRepository>) -> Self {
        Self { repository }
    }

    /// Assess one fetal heart-rate observation.
    ///
    /// Gating: anything other than a Confirmed record short-circuits to
    /// `is_pregnant: false` with no range or trend computation, so the
    /// analyzer is safe to call standalone.
    pub async fn assess(
        &self,
        animal_id: &str,
        fetal_heart_rate: f64,
        record: Option<&PregnancyRecord>,
    ) -> Result<FetalAssessment, PipelineError> {
        let record = match record {
            Some(record) if record.status == PregnancyStatus::Confirmed => record,
            _ => return Ok(FetalAssessment::not_pregnant()),
        };

        let gestation_days = record.gestation_days;
        let band = gestation_band(gestation_days);
        let (mut status, mut alert) = classify(fetal_heart_rate, &band);

        let history = self
            .repository
            .recent_pregnancy_stats(animal_id, TREND_WINDOW)
            .await?;
        let trend = compute_trend(&history);

        if let Some(trend) = &trend {
            if trend.direction != TrendDirection::Stable {
                apply_trend_escalation(trend, &mut status, &mut alert);
            }
        }

        Ok(FetalAssessment {
            is_pregnant: true,
            fetal_heart_rate: Some(fetal_heart_rate),
            gestation_days: Some(gestation_days),
            normal_range: Some(band),
            status: Some(status),
            alert,
            due_date: Some(estimate_due_date(gestation_days)),
            trend,
        })
    }
}

fn classify(fetal_heart_rate: f64, band: &MetricBand) -> (FetalStatus, Option<FetalAlert>) {
    if fetal_heart_rate < band.min {
        return (
            FetalStatus::Concern,
            Some(FetalAlert {
                severity: Severity::Medium,
                message: format!(
                    "Fetal heart rate {:.0} bpm below expected range {}",
                    fetal_heart_rate,
                    band.as_text()
                ),
            }),
        );
    }
    if fetal_heart_rate > band.max {
        return (
            FetalStatus::Concern,
            Some(FetalAlert {
                severity: Severity::Medium,
                message: format!(
                    "Fetal heart rate {:.0} bpm above expected range {}",
                    fetal_heart_rate,
                    band.as_text()
                ),
            }),
        );
    }
    if fetal_heart_rate <= band.min + BORDERLINE_MARGIN_BPM
        || fetal_heart_rate >= band.max - BORDERLINE_MARGIN_BPM
    {
        return (
            FetalStatus::Monitor,
            Some(FetalAlert {
                severity: Severity::Low,
                message: format!(
                    "Fetal heart rate {:.0} bpm near the edge of expected range {}",
                    fetal_heart_rate,
                    band.as_text()
                ),
            }),
        );
    }
    (FetalStatus::Normal, None)
}

fn estimate_due_date(gestation_days: i64) -> DueDateEstimate {
    let variance = due_date_variance(gestation_days);
    let days_remaining = GESTATION_LENGTH_DAYS - gestation_days;
    DueDateEstimate {
        days_remaining,
        earliest_days: (days_remaining - variance).max(0),
        latest_days: days_remaining + variance,
        variance_days: variance,
    }
}

/// Ordinary-least-squares slope over the monitoring window.
///
/// History arrives most-recent-first; the slope over index order is negated
/// so the reported value follows calendar time (negative = falling).
fn compute_trend(history: &[crate::repository::PregnancyStat]) -> Option<FetalTrend> {
    let rates: Vec<f64> = history.iter().map(|s| s.fetal_heart_rate).collect();
    if rates.len() < TREND_MIN_SAMPLES {
        return None;
    }

    let n = rates.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = rates.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in rates.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }

    let slope = -(numerator / denominator);

    let direction = if slope > TREND_SLOPE_THRESHOLD {
        TrendDirection::Increasing
    } else if slope < -TREND_SLOPE_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    Some(FetalTrend {
        direction,
        trend_value: slope,
        samples: rates.len(),
    })
}

/// A directional trend escalates the in-band assessment: an existing alert
/// is raised to at least medium, and a normal reading becomes a monitor
/// with an informational alert.
fn apply_trend_escalation(
    trend: &FetalTrend,
    status: &mut FetalStatus,
    alert: &mut Option<FetalAlert>,
) {
    let direction_text = match trend.direction {
        TrendDirection::Increasing => "increasing",
        TrendDirection::Decreasing => "decreasing",
        TrendDirection::Stable => return,
    };

    match alert {
        Some(alert) => {
            if alert.severity < Severity::Medium {
                alert.severity = Severity::Medium;
            }
            alert.message = format!(
                "{}; rate {} {:.1} bpm/day over recent readings",
                alert.message, direction_text, trend.trend_value.abs()
            );
        }
        None => {
            *status = FetalStatus::Monitor;
            *alert = Some(FetalAlert {
                severity: Severity::Low,
                message: format!(
                    "Fetal heart rate {} {:.1} bpm/day over recent readings",
                    direction_text,
                    trend.trend_value.abs()
                ),
            });
        }
    }
}
