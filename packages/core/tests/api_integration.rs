//! Integration tests for the HTTP surface.
//!
//! Each test boots the full Axum router (same assembly as `main.rs`) using
//! `tower::ServiceExt::oneshot` — no live server needed.
//!
//! `build_test_app()` wires together:
//! - An in-memory SQLite pool with the schema applied
//! - The in-memory time-series writer (or a wiremocked line-protocol
//!   endpoint where the test says so)
//! - The full pipeline, hub, simulation engine, and Prometheus metrics
//! - The complete `Router<()>` returned ready for `oneshot`

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use herd_monitor::{
    api::{build_router, ApiState},
    auth::{hash_api_key, AuthGate},
    db::create_pool,
    hub::ConnectionHub,
    metrics::AppMetrics,
    pipeline::IngestPipeline,
    repository::{HerdRepository, PregnancyRecord, PregnancyStatus},
    simulation::SimulationEngine,
    tsdb::{MemoryTimeSeries, TimeSeriesWriter},
};

const PEPPER: &str = "integration-pepper";

struct TestApp {
    router: Router,
    repository: Arc<HerdRepository>,
    tsdb: Arc<MemoryTimeSeries>,
    simulations: Arc<SimulationEngine>,
}

async fn build_test_app(static_key: Option<&str>) -> TestApp {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    let repository = Arc::new(HerdRepository::new(pool));
    let metrics = Arc::new(AppMetrics::new().unwrap());
    let tsdb = Arc::new(MemoryTimeSeries::new(1000));
    let writer: Arc<dyn TimeSeriesWriter> = tsdb.clone();
    let pipeline = Arc::new(IngestPipeline::new(
        repository.clone(),
        writer,
        metrics.clone(),
    ));
    let hub = Arc::new(ConnectionHub::new(metrics.clone()));
    let simulations = Arc::new(SimulationEngine::new(
        pipeline.clone(),
        hub.clone(),
        repository.clone(),
        metrics.clone(),
    ));
    let auth = Arc::new(AuthGate::new(
        repository.clone(),
        static_key.map(str::to_string),
        PEPPER.to_string(),
    ));

    let router = build_router(ApiState {
        auth,
        pipeline,
        hub,
        simulations: simulations.clone(),
        metrics,
    });

    TestApp {
        router,
        repository,
        tsdb,
        simulations,
    }
}

async fn register_device(app: &TestApp, device_id: &str, key: &str, animal_id: Option<&str>) {
    app.repository
        .insert_device(device_id, &hash_api_key(key, PEPPER), animal_id, &["HEALTH"])
        .await
        .unwrap();
}

fn sensor_data_request(device_id: &str, api_key: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/sensor-data")
        .header("content-type", "application/json")
        .header("x-device-id", device_id)
        .header("x-api-key", api_key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

const HEALTH_BODY: &str = r#"{
    "readings": [
        {"sensorType": "HEALTH",
         "values": {"heart_rate": 75.0, "temperature": 38.5, "activity": 6.0}}
    ]
}"#;

// ---- health and metrics ----

#[tokio::test]
async fn health_returns_ok() {
    let app = build_test_app(None).await;
    let resp = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_reflect_an_ingested_batch() {
    let app = build_test_app(None).await;
    register_device(&app, "collar-7", "secret", Some("A1")).await;

    app.router
        .clone()
        .oneshot(sensor_data_request("collar-7", "secret", HEALTH_BODY))
        .await
        .unwrap();

    let resp = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert_eq!(content_type, "text/plain; version=0.0.4");

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("herd_monitor_batches_ingested_total 1"));
}

// ---- REST ingestion ----

#[tokio::test]
async fn rest_ingest_happy_path_persists_both_stores() {
    let app = build_test_app(None).await;
    register_device(&app, "collar-7", "secret", Some("A1")).await;

    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("collar-7", "secret", HEALTH_BODY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["anomalyDetected"], false);

    assert_eq!(app.tsdb.flushed_len().await, 1);
    let rows = app.repository.recent_health_samples("A1", 10).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn rest_ingest_error_statuses() {
    let app = build_test_app(None).await;
    register_device(&app, "collar-7", "secret", Some("A1")).await;

    // 401 — bad key.
    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("collar-7", "wrong", HEALTH_BODY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 404 — unknown device.
    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("ghost", "secret", HEALTH_BODY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // 400 — out-of-range reading.
    let invalid = r#"{
        "readings": [
            {"sensorType": "HEALTH",
             "values": {"heart_rate": 300.0, "temperature": 38.5, "activity": 6.0}}
        ]
    }"#;
    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("collar-7", "secret", invalid))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rest_ingest_all_or_nothing_on_validation_failure() {
    let app = build_test_app(None).await;
    register_device(&app, "collar-7", "secret", Some("A1")).await;

    let mixed = r#"{
        "readings": [
            {"sensorType": "DHT11", "values": {"temperature": 24.0, "humidity": 55.0}},
            {"sensorType": "MPU6050",
             "values": {"accelX": 50.0, "accelY": 0.0, "accelZ": 0.0,
                        "gyroX": 0.0, "gyroY": 0.0, "gyroZ": 0.0,
                        "temperature": 25.0}}
        ]
    }"#;
    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("collar-7", "secret", mixed))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Neither store saw anything from the batch.
    assert_eq!(app.tsdb.flushed_len().await, 0);
    let rows = app.repository.recent_health_samples("A1", 10).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn rest_ingest_with_static_key_needs_no_registration() {
    let app = build_test_app(Some("master-key")).await;

    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("field-unit-9", "master-key", HEALTH_BODY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn anomaly_emerges_after_history_builds_up() {
    let app = build_test_app(None).await;
    register_device(&app, "collar-7", "secret", Some("A1")).await;

    // Build a stable history.
    for _ in 0..7 {
        let resp = app
            .router
            .clone()
            .oneshot(sensor_data_request("collar-7", "secret", HEALTH_BODY))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // A fever reading is now an anomaly against the adaptive band.
    let fever = r#"{
        "readings": [
            {"sensorType": "HEALTH",
             "values": {"heart_rate": 75.0, "temperature": 41.0, "activity": 6.0}}
        ]
    }"#;
    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("collar-7", "secret", fever))
        .await
        .unwrap();
    let json = body_json(resp.into_body()).await;
    assert_eq!(json["anomalyDetected"], true);
}

#[tokio::test]
async fn pregnancy_assessment_rides_along_the_ack() {
    let app = build_test_app(None).await;
    register_device(&app, "collar-7", "secret", Some("A1")).await;
    app.repository
        .upsert_pregnancy_record(&PregnancyRecord {
            animal_id: "A1".to_string(),
            status: PregnancyStatus::Confirmed,
            gestation_days: 250,
            expected_due_date: None,
            last_checkup: None,
        })
        .await
        .unwrap();

    let body = r#"{
        "readings": [
            {"sensorType": "PREGNANCY", "values": {"fetal_heart_rate": 148.0}}
        ]
    }"#;
    let resp = app
        .router
        .clone()
        .oneshot(sensor_data_request("collar-7", "secret", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp.into_body()).await;
    let fetal = &json["fetalHealthData"];
    assert_eq!(fetal["isPregnant"], true);
    assert_eq!(fetal["gestationDays"], 250);
    // Day 250 band is [130, 165]; 148 is normal.
    assert_eq!(fetal["status"], "normal");
    assert_eq!(fetal["dueDate"]["daysRemaining"], 35);
}

// ---- simulations endpoint ----

#[tokio::test]
async fn simulations_endpoint_reports_active_timers() {
    let app = build_test_app(None).await;
    app.simulations
        .start("A1", Some(std::time::Duration::from_secs(3600)));

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/simulations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp.into_body()).await;
    assert_eq!(json["type"], "simulationStatus");
    assert_eq!(json["simulations"][0], "A1");

    app.simulations.stop_all();
}

// ---- line-protocol writer wired in ----

#[tokio::test]
async fn rest_ingest_flushes_to_a_line_protocol_endpoint() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pool = create_pool("sqlite::memory:").await.unwrap();
    let repository = Arc::new(HerdRepository::new(pool));
    let metrics = Arc::new(AppMetrics::new().unwrap());
    let tsdb = Arc::new(herd_monitor::services::influx::InfluxWriter::new(
        mock_server.uri(),
        "token".to_string(),
        "herd".to_string(),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        repository.clone(),
        tsdb,
        metrics.clone(),
    ));
    let hub = Arc::new(ConnectionHub::new(metrics.clone()));
    let simulations = Arc::new(SimulationEngine::new(
        pipeline.clone(),
        hub.clone(),
        repository.clone(),
        metrics.clone(),
    ));
    let auth = Arc::new(AuthGate::new(
        repository.clone(),
        Some("master-key".to_string()),
        PEPPER.to_string(),
    ));
    let router = build_router(ApiState {
        auth,
        pipeline,
        hub,
        simulations,
        metrics,
    });

    let resp = router
        .oneshot(sensor_data_request("field-unit-9", "master-key", HEALTH_BODY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
