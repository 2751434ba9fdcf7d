use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;

use herd_monitor::api::{build_router, ApiState};
use herd_monitor::auth::AuthGate;
use herd_monitor::cli::Cli;
use herd_monitor::config::Config;
use herd_monitor::db;
use herd_monitor::error::AppError;
use herd_monitor::hub::ConnectionHub;
use herd_monitor::logging::init_logging;
use herd_monitor::metrics::AppMetrics;
use herd_monitor::pipeline::IngestPipeline;
use herd_monitor::repository::HerdRepository;
use herd_monitor::services::influx::InfluxWriter;
use herd_monitor::simulation::SimulationEngine;
use herd_monitor::tsdb::{MemoryTimeSeries, TimeSeriesWriter};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::from_env()
        .map_err(AppError::Config)
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(sim_interval) = cli.sim_interval {
        config.sim_interval_ms = sim_interval;
    }

    let pool = db::create_pool(&config.database_url)
        .await
        .map_err(|err| AppError::Storage(err.to_string()))
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });
    let repository = Arc::new(HerdRepository::new(pool));

    let metrics = Arc::new(AppMetrics::new().unwrap_or_else(|err| {
        tracing::error!("Metrics registry error: {}", err);
        std::process::exit(1);
    }));

    // The time-series writer is chosen once here; there is no runtime
    // fallback between implementations.
    let tsdb: Arc<dyn TimeSeriesWriter> = match &config.influx {
        Some(influx) => {
            tracing::info!("Time-series writer: line protocol at {}", influx.url);
            Arc::new(InfluxWriter::new(
                influx.url.clone(),
                influx.token.clone(),
                influx.bucket.clone(),
            ))
        }
        None => {
            tracing::info!("Time-series writer: in-memory (no INFLUX_URL configured)");
            Arc::new(MemoryTimeSeries::default())
        }
    };

    let pipeline = Arc::new(IngestPipeline::new(
        repository.clone(),
        tsdb,
        metrics.clone(),
    ));
    let hub = Arc::new(ConnectionHub::new(metrics.clone()));
    let simulations = Arc::new(
        SimulationEngine::new(
            pipeline.clone(),
            hub.clone(),
            repository.clone(),
            metrics.clone(),
        )
        .with_default_interval(Duration::from_millis(config.sim_interval_ms)),
    );
    let auth = Arc::new(AuthGate::new(
        repository,
        config.static_api_key.clone(),
        config.api_key_pepper.clone(),
    ));

    let app = build_router(ApiState {
        auth,
        pipeline,
        hub,
        simulations: simulations.clone(),
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|err| {
            tracing::error!("Failed to bind {}: {}", config.bind_addr, err);
            std::process::exit(1);
        });
    tracing::info!("Herd monitor listening on {}", config.bind_addr);

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
    {
        tracing::error!("Server error: {}", err);
    }

    simulations.stop_all();
    tracing::info!("Herd monitor stopped cleanly");
}
