//! Sensor reading types and batch validation.
//!
//! A batch is validated in full before anything is persisted: the first
//! failing reading aborts the whole batch with a [`PipelineError::Validation`]
//! naming the sensor type and field, so no partial writes can happen.
//!
//! Field values carry their runtime type as a tagged variant, resolved once
//! when the batch is deserialized at the ingestion boundary.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PipelineError;

/// Supported sensor hardware classes. Unknown type strings deserialize to
/// `Custom`, which requires no fields and always validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorType {
    #[serde(rename = "DHT11")]
    Dht11,
    #[serde(rename = "MPU6050")]
    Mpu6050,
    #[serde(rename = "MICROPHONE")]
    Microphone,
    #[serde(rename = "HEALTH")]
    Health,
    #[serde(rename = "PREGNANCY")]
    Pregnancy,
    #[serde(rename = "CUSTOM")]
    Custom,
}

impl SensorType {
    fn parse(value: &str) -> Self {
        match value {
            "DHT11" => SensorType::Dht11,
            "MPU6050" => SensorType::Mpu6050,
            "MICROPHONE" => SensorType::Microphone,
            "HEALTH" => SensorType::Health,
            "PREGNANCY" => SensorType::Pregnancy,
            _ => SensorType::Custom,
        }
    }
}

impl<'de> Deserialize<'de> for SensorType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(SensorType::parse(&raw))
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorType::Dht11 => "DHT11",
            SensorType::Mpu6050 => "MPU6050",
            SensorType::Microphone => "MICROPHONE",
            SensorType::Health => "HEALTH",
            SensorType::Pregnancy => "PREGNANCY",
            SensorType::Custom => "CUSTOM",
        };
        write!(f, "{}", name)
    }
}

/// One sensor field value with its runtime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A single sensor reading inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub sensor_type: SensorType,
    pub values: HashMap<String, FieldValue>,
}

impl SensorReading {
    pub fn numeric(&self, field: &str) -> Option<f64> {
        self.values.get(field).and_then(FieldValue::as_number)
    }
}

/// One submitted group of readings sharing a device, optional animal, and
/// timestamp. Timestamp defaults to receipt time when absent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorBatch {
    pub device_id: String,
    #[serde(default)]
    pub animal_id: Option<String>,
    pub readings: Vec<SensorReading>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SensorBatch {
    /// First fetal heart rate value anywhere in the batch, regardless of
    /// sensor type.
    pub fn fetal_heart_rate(&self) -> Option<f64> {
        self.readings
            .iter()
            .find_map(|r| r.numeric(FETAL_HEART_RATE_FIELD))
    }
}

pub const FETAL_HEART_RATE_FIELD: &str = "fetal_heart_rate";

// Hardware range limits, inclusive.
pub const DHT11_TEMP_MIN_C: f64 = -40.0;
pub const DHT11_TEMP_MAX_C: f64 = 80.0;
pub const HUMIDITY_MIN_PCT: f64 = 0.0;
pub const HUMIDITY_MAX_PCT: f64 = 100.0;
pub const ACCEL_MAX_MS2: f64 = 19.6;
pub const GYRO_MAX_DPS: f64 = 250.0;
pub const MPU_TEMP_MIN_C: f64 = -40.0;
pub const MPU_TEMP_MAX_C: f64 = 85.0;
pub const AUDIO_LEVEL_MIN_DB: f64 = 0.0;
pub const AUDIO_LEVEL_MAX_DB: f64 = 120.0;
pub const FREQUENCY_MIN_HZ: f64 = 20.0;
pub const FREQUENCY_MAX_HZ: f64 = 20_000.0;
pub const HEART_RATE_MIN_BPM: f64 = 40.0;
pub const HEART_RATE_MAX_BPM: f64 = 140.0;
pub const BODY_TEMP_MIN_C: f64 = 36.0;
pub const BODY_TEMP_MAX_C: f64 = 42.0;
pub const FETAL_HEART_RATE_MIN_BPM: f64 = 100.0;
pub const FETAL_HEART_RATE_MAX_BPM: f64 = 200.0;

fn required_fields(sensor_type: SensorType) -> &'static [&'static str] {
    match sensor_type {
        SensorType::Dht11 => &["temperature", "humidity"],
        SensorType::Mpu6050 => &[
            "accelX", "accelY", "accelZ", "gyroX", "gyroY", "gyroZ", "temperature",
        ],
        SensorType::Microphone => &["audioLevel", "frequency"],
        SensorType::Health => &["heart_rate", "temperature", "activity"],
        SensorType::Pregnancy => &[FETAL_HEART_RATE_FIELD],
        SensorType::Custom => &[],
    }
}

/// Validate every reading in the batch. Returns on the first failure; no
/// caller may persist anything before this returns `Ok`.
pub fn validate_batch(readings: &[SensorReading]) -> Result<(), PipelineError> {
    for reading in readings {
        validate_reading(reading)?;
    }
    Ok(())
}

fn validate_reading(reading: &SensorReading) -> Result<(), PipelineError> {
    let sensor_type = reading.sensor_type;

    for field in required_fields(sensor_type) {
        match reading.values.get(*field) {
            None => {
                return Err(PipelineError::validation(
                    sensor_type.to_string(),
                    *field,
                    "required field missing",
                ));
            }
            Some(value) if value.as_number().is_none() => {
                return Err(PipelineError::validation(
                    sensor_type.to_string(),
                    *field,
                    "required field must be numeric",
                ));
            }
            Some(_) => {}
        }
    }

    match sensor_type {
        SensorType::Dht11 => {
            check_range(reading, "temperature", DHT11_TEMP_MIN_C, DHT11_TEMP_MAX_C)?;
            check_range(reading, "humidity", HUMIDITY_MIN_PCT, HUMIDITY_MAX_PCT)?;
        }
        SensorType::Mpu6050 => {
            for axis in ["accelX", "accelY", "accelZ"] {
                check_range(reading, axis, -ACCEL_MAX_MS2, ACCEL_MAX_MS2)?;
            }
            for axis in ["gyroX", "gyroY", "gyroZ"] {
                check_range(reading, axis, -GYRO_MAX_DPS, GYRO_MAX_DPS)?;
            }
            check_range(reading, "temperature", MPU_TEMP_MIN_C, MPU_TEMP_MAX_C)?;
        }
        SensorType::Microphone => {
            check_range(reading, "audioLevel", AUDIO_LEVEL_MIN_DB, AUDIO_LEVEL_MAX_DB)?;
            check_range(reading, "frequency", FREQUENCY_MIN_HZ, FREQUENCY_MAX_HZ)?;
        }
        SensorType::Health => {
            check_range(reading, "heart_rate", HEART_RATE_MIN_BPM, HEART_RATE_MAX_BPM)?;
            check_range(reading, "temperature", BODY_TEMP_MIN_C, BODY_TEMP_MAX_C)?;
        }
        SensorType::Pregnancy => {
            check_range(
                reading,
                FETAL_HEART_RATE_FIELD,
                FETAL_HEART_RATE_MIN_BPM,
                FETAL_HEART_RATE_MAX_BPM,
            )?;
        }
        SensorType::Custom => {}
    }

    Ok(())
}

fn check_range(
    reading: &SensorReading,
    field: &str,
    min: f64,
    max: f64,
) -> Result<(), PipelineError> {
    // Required-field presence is checked before ranges; a field absent here
    // is an optional one and passes.
    let Some(value) = reading.numeric(field) else {
        return Ok(());
    };
    if value < min || value > max {
        return Err(PipelineError::validation(
            reading.sensor_type.to_string(),
            field,
            format!("value {} outside [{}, {}]", value, min, max),
        ));
    }
    Ok(())
}
