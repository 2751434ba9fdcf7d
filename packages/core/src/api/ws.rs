//! WebSocket session endpoint.
//!
//! `GET /ws?type=dashboard|device|simulator&deviceId=…&apiKey=…&animalId=…`
//!
//! Dashboards connect without credentials and may subscribe to one animal.
//! Devices and simulators must pass the auth gate; on failure they receive
//! a structured error and the socket closes. Message handling is
//! independent per session and order-preserving within one session; a bad
//! message produces an error reply, never a disconnect.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::hub::SessionRole;
use crate::sensors::{SensorBatch, SensorReading};

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "type")]
    pub session_type: Option<String>,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "animalId")]
    pub animal_id: Option<String>,
}

/// Inbound session messages, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundMessage {
    #[serde(rename = "sensorData", rename_all = "camelCase")]
    SensorData {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        animal_id: Option<String>,
        readings: Vec<SensorReading>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    #[serde(rename = "startSimulation", rename_all = "camelCase")]
    StartSimulation {
        animal_id: String,
        #[serde(default)]
        interval: Option<u64>,
    },
    #[serde(rename = "stopSimulation", rename_all = "camelCase")]
    StopSimulation {
        #[serde(default)]
        animal_id: Option<String>,
        #[serde(default)]
        all: bool,
    },
    #[serde(rename = "getSimulationStatus")]
    GetSimulationStatus,
}

/// Per-session context threaded through message dispatch.
pub(crate) struct SessionContext {
    pub device_id: Option<String>,
    pub paired_animal_id: Option<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, params, state))
}

async fn handle_session(socket: WebSocket, params: ConnectParams, state: ApiState) {
    let (mut sink, mut stream) = socket.split();

    let role = match params.session_type.as_deref() {
        None | Some("dashboard") => SessionRole::Dashboard,
        Some("device") => SessionRole::Device,
        Some("simulator") => SessionRole::Simulator,
        Some(other) => {
            let error = json!({ "type": "error", "message": format!("Unknown session type: {}", other) });
            let _ = sink.send(Message::Text(error.to_string())).await;
            return;
        }
    };

    let identity = if role == SessionRole::Dashboard {
        None
    } else {
        let Some(api_key) = params.api_key.as_deref() else {
            let error = json!({ "type": "error", "message": "Missing credentials" });
            let _ = sink.send(Message::Text(error.to_string())).await;
            return;
        };
        match state.auth.authenticate(params.device_id.as_deref(), api_key).await {
            Ok(identity) => Some(identity),
            Err(_) => {
                let error = json!({ "type": "error", "message": "Invalid credentials" });
                let _ = sink.send(Message::Text(error.to_string())).await;
                return;
            }
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let monitoring_animal_id = match role {
        SessionRole::Dashboard => params.animal_id.clone(),
        _ => None,
    };
    let session_id = state
        .hub
        .register(
            role,
            identity.as_ref().map(|i| i.device_id.clone()),
            monitoring_animal_id,
            tx.clone(),
        )
        .await;
    tracing::info!("Session {} connected ({:?})", session_id, role);

    let connected = match &identity {
        None => json!({
            "type": "connection",
            "status": "connected",
            "activeSimulations": state.simulations.active(),
        }),
        Some(identity) => json!({
            "type": "connection",
            "status": "connected",
            "deviceId": identity.device_id,
            "animalId": identity.animal_id,
        }),
    };
    let _ = tx.send(connected.to_string());

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    let ctx = SessionContext {
        device_id: identity.as_ref().map(|i| i.device_id.clone()),
        paired_animal_id: identity.and_then(|i| i.animal_id),
        tx,
    };

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => dispatch_message(&text, &ctx, &state).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            _ = &mut writer => break,
        }
    }

    // Disconnect removes the session and nothing else — simulations the
    // session started keep running.
    state.hub.unregister(session_id).await;
    writer.abort();
    tracing::info!("Session {} disconnected", session_id);
}

/// Handle one inbound message. Extracted from the socket loop so the
/// protocol is testable over plain channels.
pub(crate) async fn dispatch_message(text: &str, ctx: &SessionContext, state: &ApiState) {
    let message: InboundMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            send_error(ctx, &format!("Unrecognized message: {}", err));
            return;
        }
    };

    match message {
        InboundMessage::SensorData {
            device_id,
            animal_id,
            readings,
            timestamp,
        } => {
            let Some(device_id) = device_id.or_else(|| ctx.device_id.clone()) else {
                send_error(ctx, "sensorData requires a device id");
                return;
            };
            let batch = SensorBatch {
                device_id,
                animal_id: animal_id.or_else(|| ctx.paired_animal_id.clone()),
                readings,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };

            match state.pipeline.ingest(&batch).await {
                Ok(outcome) => {
                    let ack = json!({
                        "type": "dataReceived",
                        "timestamp": batch.timestamp,
                        "anomalyDetected": outcome.anomaly_detected,
                        "fetalHealthData": outcome.fetal_health,
                    });
                    let _ = ctx.tx.send(ack.to_string());
                    state.hub.publish_batch(&batch, &outcome).await;
                }
                Err(err @ PipelineError::Validation { .. }) => send_error(ctx, &err.to_string()),
                Err(err) => {
                    tracing::error!("Session ingest failed: {}", err);
                    send_error(ctx, "Internal server error");
                }
            }
        }

        InboundMessage::StartSimulation { animal_id, interval } => {
            state
                .simulations
                .start(&animal_id, interval.map(Duration::from_millis));
            let _ = ctx
                .tx
                .send(json!({ "type": "simulationStarted", "animalId": animal_id }).to_string());
            state
                .hub
                .publish_global(&state.simulations.status_event())
                .await;
        }

        InboundMessage::StopSimulation { animal_id, all } => {
            if all {
                state.simulations.stop_all();
                let _ = ctx
                    .tx
                    .send(json!({ "type": "simulationStopped", "all": true }).to_string());
            } else if let Some(animal_id) = animal_id {
                state.simulations.stop(&animal_id);
                let _ = ctx
                    .tx
                    .send(json!({ "type": "simulationStopped", "animalId": animal_id }).to_string());
            } else {
                send_error(ctx, "stopSimulation requires animalId or all");
                return;
            }
            state
                .hub
                .publish_global(&state.simulations.status_event())
                .await;
        }

        InboundMessage::GetSimulationStatus => {
            let _ = ctx.tx.send(state.simulations.status_event().to_string());
        }
    }
}

fn send_error(ctx: &SessionContext, message: &str) {
    let _ = ctx
        .tx
        .send(json!({ "type": "error", "message": message }).to_string());
}
