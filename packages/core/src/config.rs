use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub static_api_key: Option<String>,
    pub api_key_pepper: String,
    pub influx: Option<InfluxConfig>,
    pub sim_interval_ms: u64,
}

/// External time-series endpoint. Present iff `INFLUX_URL` is set; the
/// writer is selected once at startup, never as a runtime fallback.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub bucket: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let static_api_key = env::var("STATIC_API_KEY").ok().filter(|key| !key.is_empty());

        let api_key_pepper = env::var("API_KEY_PEPPER").unwrap_or_default();

        let influx = match env::var("INFLUX_URL") {
            Ok(url) => {
                let token = env::var("INFLUX_TOKEN")
                    .map_err(|_| "INFLUX_TOKEN is required when INFLUX_URL is set")?;
                let bucket = env::var("INFLUX_BUCKET")
                    .map_err(|_| "INFLUX_BUCKET is required when INFLUX_URL is set")?;
                Some(InfluxConfig { url, token, bucket })
            }
            Err(_) => None,
        };

        let sim_interval_ms = match env::var("SIM_INTERVAL_MS") {
            Ok(value) => value
                .parse::<u64>()
                .map_err(|_| "SIM_INTERVAL_MS must be a valid number")?,
            Err(_) => 5000,
        };

        Ok(Self {
            database_url,
            bind_addr,
            static_api_key,
            api_key_pepper,
            influx,
            sim_interval_ms,
        })
    }
}
