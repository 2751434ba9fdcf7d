//! HTTP and WebSocket surface.
//!
//! Route map:
//! - `GET  /health`      — liveness, no auth
//! - `GET  /metrics`     — Prometheus text exposition, no auth
//! - `POST /sensor-data` — REST ingestion for non-session devices
//! - `GET  /simulations` — current simulation status
//! - `GET  /ws`          — session upgrade (dashboard / device / simulator)

pub mod health;
pub mod ingest;
pub mod ws;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::auth::AuthGate;
use crate::hub::ConnectionHub;
use crate::metrics::AppMetrics;
use crate::pipeline::IngestPipeline;
use crate::simulation::SimulationEngine;

/// Shared state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub auth: Arc<AuthGate>,
    pub pipeline: Arc<IngestPipeline>,
    pub hub: Arc<ConnectionHub>,
    pub simulations: Arc<SimulationEngine>,
    pub metrics: Arc<AppMetrics>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(render_metrics))
        .route("/sensor-data", post(ingest::ingest_sensor_data))
        .route("/simulations", get(simulation_status))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn render_metrics(State(state): State<ApiState>) -> Response {
    match state.metrics.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(Body::from(body))
            .expect("metrics response should be valid"),
        Err(err) => {
            tracing::error!("Metrics rendering failed: {}", err);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("metrics unavailable"))
                .expect("metrics error response should be valid")
        }
    }
}

async fn simulation_status(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(state.simulations.status_event())
}
