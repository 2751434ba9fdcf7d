//! Result types for vitals and pregnancy analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity, ordered low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// The [min, max] range considered non-anomalous for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBand {
    pub min: f64,
    pub max: f64,
}

impl MetricBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Human-readable band text used in anomaly messages.
    pub fn as_text(&self) -> String {
        format!("{:.1}-{:.1}", self.min, self.max)
    }
}

/// One triggered metric in an anomaly report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEntry {
    pub metric: String,
    pub value: f64,
    pub normal_range: String,
    pub severity: Severity,
    pub message: String,
}

/// Outcome of assessing one vitals sample against the animal's recent
/// history. Ephemeral — returned to the caller and broadcast, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub animal_id: String,
    pub timestamp: DateTime<Utc>,
    pub anomalies: Vec<AnomalyEntry>,
    pub overall_severity: Severity,
    pub is_anomaly: bool,
}

/// Fetal heart-rate status relative to the gestation band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetalStatus {
    Normal,
    Monitor,
    Concern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetalAlert {
    pub severity: Severity,
    pub message: String,
}

/// Due-date window widened by a gestation-stage variance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueDateEstimate {
    pub days_remaining: i64,
    pub earliest_days: i64,
    pub latest_days: i64,
    pub variance_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Fetal heart-rate trend over the recent monitoring window. The slope is
/// expressed in calendar direction: negative means the rate is falling as
/// time moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetalTrend {
    pub direction: TrendDirection,
    pub trend_value: f64,
    pub samples: usize,
}

/// Gestation-aware assessment of one fetal heart-rate observation.
///
/// `is_pregnant: false` short-circuits everything else — no range, trend, or
/// due-date fields are populated for unconfirmed animals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetalAssessment {
    pub is_pregnant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetal_heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gestation_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_range: Option<MetricBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FetalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<FetalAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DueDateEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<FetalTrend>,
}

impl FetalAssessment {
    /// The gated response for unconfirmed pregnancies.
    pub fn not_pregnant() -> Self {
        Self {
            is_pregnant: false,
            fetal_heart_rate: None,
            gestation_days: None,
            normal_range: None,
            status: None,
            alert: None,
            due_date: None,
            trend: None,
        }
    }
}
