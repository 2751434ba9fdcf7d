//! REST ingestion for non-session devices.
//!
//! `POST /sensor-data` with `x-api-key` and `x-device-id` headers. Unlike
//! the session path, the REST route distinguishes an unknown device (404)
//! from bad credentials (401), per the public API contract.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::analysis::types::FetalAssessment;
use crate::error::PipelineError;
use crate::sensors::{SensorBatch, SensorReading};

use super::ApiState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub readings: Vec<SensorReading>,
    #[serde(default)]
    pub animal_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub success: bool,
    pub anomaly_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetal_health_data: Option<FetalAssessment>,
}

pub async fn ingest_sensor_data(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<Value>)> {
    let api_key = header_value(&headers, "x-api-key")?;
    let device_id = header_value(&headers, "x-device-id")?;

    let identity = state
        .auth
        .authenticate_device(&device_id, &api_key)
        .await
        .map_err(error_response)?;

    let batch = SensorBatch {
        device_id: identity.device_id,
        animal_id: body.animal_id.or(identity.animal_id),
        readings: body.readings,
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
    };

    let outcome = state
        .pipeline
        .ingest(&batch)
        .await
        .map_err(error_response)?;

    state.hub.publish_batch(&batch, &outcome).await;

    Ok(Json(IngestResponse {
        success: true,
        anomaly_detected: outcome.anomaly_detected,
        fetal_health_data: outcome.fetal_health,
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String, (StatusCode, Json<Value>)> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": format!("Missing {} header", name) })),
            )
        })
}

fn error_response(err: PipelineError) -> (StatusCode, Json<Value>) {
    match err {
        PipelineError::Validation { .. } => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
        }
        PipelineError::Auth => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid credentials" })),
        ),
        PipelineError::NotFound(resource) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{} not found", resource) })),
        ),
        // Full detail stays server-side; callers get a generic failure.
        other => {
            tracing::error!("Ingestion failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
        }
    }
}
