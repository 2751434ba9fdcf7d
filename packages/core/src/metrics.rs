//! Prometheus metrics registry for the herd monitor.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it to
//! the pipeline, hub, and simulation engine.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`). The endpoint is intentionally excluded
//! from device auth so it can be scraped by Prometheus / Grafana agents.

use prometheus::{Counter, Gauge, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Total sensor batches accepted by the pipeline (REST + sessions + simulation).
    pub batches_ingested_total: Counter,
    /// Total batches rejected by validation.
    pub validation_failures_total: Counter,
    /// Total anomaly reports with at least one triggered metric.
    pub anomalies_detected_total: Counter,
    /// Total store write/flush failures recovered inside the pipeline.
    pub persistence_errors_total: Counter,
    /// Total events fanned out to dashboard sessions.
    pub broadcast_events_total: Counter,
    /// Current number of live sessions (all roles).
    pub active_sessions: Gauge,
    /// Current number of running simulations.
    pub active_simulations: Gauge,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated (should not happen in practice).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let batches_ingested_total = Counter::with_opts(Opts::new(
            "herd_monitor_batches_ingested_total",
            "Sensor batches accepted by the pipeline",
        ))?;

        let validation_failures_total = Counter::with_opts(Opts::new(
            "herd_monitor_validation_failures_total",
            "Sensor batches rejected by validation",
        ))?;

        let anomalies_detected_total = Counter::with_opts(Opts::new(
            "herd_monitor_anomalies_detected_total",
            "Anomaly reports with at least one triggered metric",
        ))?;

        let persistence_errors_total = Counter::with_opts(Opts::new(
            "herd_monitor_persistence_errors_total",
            "Store write or flush failures recovered inside the pipeline",
        ))?;

        let broadcast_events_total = Counter::with_opts(Opts::new(
            "herd_monitor_broadcast_events_total",
            "Events fanned out to dashboard sessions",
        ))?;

        let active_sessions = Gauge::with_opts(Opts::new(
            "herd_monitor_active_sessions",
            "Live sessions across all roles",
        ))?;

        let active_simulations = Gauge::with_opts(Opts::new(
            "herd_monitor_active_simulations",
            "Running per-animal simulations",
        ))?;

        registry.register(Box::new(batches_ingested_total.clone()))?;
        registry.register(Box::new(validation_failures_total.clone()))?;
        registry.register(Box::new(anomalies_detected_total.clone()))?;
        registry.register(Box::new(persistence_errors_total.clone()))?;
        registry.register(Box::new(broadcast_events_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(active_simulations.clone()))?;

        Ok(Self {
            batches_ingested_total,
            validation_failures_total,
            anomalies_detected_total,
            persistence_errors_total,
            broadcast_events_total,
            active_sessions,
            active_simulations,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
