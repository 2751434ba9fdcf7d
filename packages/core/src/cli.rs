use clap::Parser;

/// Herd monitor CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "herd-monitor",
    version,
    about = "Real-time livestock biometric telemetry ingestion and monitoring"
)]
pub struct Cli {
    /// Socket address for the HTTP/WebSocket server
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Relational database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Default simulation tick interval in milliseconds
    #[arg(long)]
    pub sim_interval: Option<u64>,
}
