//! Line-protocol writer for an InfluxDB-compatible time-series store.
//!
//! Points are rendered to line protocol as they are buffered; `flush` ships
//! the accumulated lines in one `POST /api/v2/write`. Numeric fields are
//! written bare, booleans as `true`/`false`, strings quoted — each value
//! keeps the runtime type it carried through the pipeline.

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::sensors::FieldValue;
use crate::tsdb::{TelemetryPoint, TimeSeriesWriter};

pub struct InfluxWriter {
    base_url: String,
    token: String,
    bucket: String,
    http: Client,
    lines: Mutex<Vec<String>>,
}

impl InfluxWriter {
    pub fn new(base_url: String, token: String, bucket: String) -> Self {
        Self {
            base_url,
            token,
            bucket,
            http: Client::new(),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TimeSeriesWriter for InfluxWriter {
    async fn write_point(&self, point: TelemetryPoint) -> Result<(), PipelineError> {
        if let Some(line) = render_line(&point) {
            self.lines.lock().await.push(line);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), PipelineError> {
        let body = {
            let mut lines = self.lines.lock().await;
            if lines.is_empty() {
                return Ok(());
            }
            lines.drain(..).collect::<Vec<_>>().join("\n")
        };

        let url = format!(
            "{}/api/v2/write?bucket={}&precision=ns",
            self.base_url, self.bucket
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|err| PipelineError::persistence(err.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::persistence(format!(
                "time-series store returned HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }

    fn writer_name(&self) -> &str {
        "influx"
    }
}

/// Render one point to line protocol. Returns `None` for a point with no
/// fields — Influx rejects field-less lines.
fn render_line(point: &TelemetryPoint) -> Option<String> {
    if point.fields.is_empty() {
        return None;
    }

    let mut line = escape_key(&point.measurement);
    line.push_str(",device_id=");
    line.push_str(&escape_key(&point.device_id));
    if let Some(animal_id) = &point.animal_id {
        line.push_str(",animal_id=");
        line.push_str(&escape_key(animal_id));
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(name, value)| format!("{}={}", escape_key(name), render_value(value)))
        .collect();

    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&point.timestamp.timestamp_nanos_opt().unwrap_or(0).to_string());

    Some(line)
}

fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => format!("{}", n),
        FieldValue::Flag(b) => b.to_string(),
        FieldValue::Text(s) => format!("\"{}\"", s.replace('"', "\\\"")),
    }
}

fn escape_key(key: &str) -> String {
    key.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}
