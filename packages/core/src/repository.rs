//! Database repository for the relational store.
//!
//! All SQLite read/write logic lives here: device lookup for authentication,
//! append-only `health_samples` and `pregnancy_stats` rows written by the
//! ingest pipeline, and read-only `pregnancy_records`. Timestamps are stored
//! as RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A registered device row. The raw API key is never stored or re-exposed —
/// only its hash.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub api_key_hash: String,
    pub animal_id: Option<String>,
    pub sensor_types: Vec<String>,
    pub status: String,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// One appended vitals row. One row may be created per qualifying reading;
/// rows are never upserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub animal_id: String,
    pub recorded_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub heart_rate: Option<f64>,
    pub activity: Option<f64>,
}

/// Pregnancy bookkeeping for an animal, maintained outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregnancyRecord {
    pub animal_id: String,
    pub status: PregnancyStatus,
    pub gestation_days: i64,
    pub expected_due_date: Option<DateTime<Utc>>,
    pub last_checkup: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PregnancyStatus {
    Unknown,
    Confirmed,
    NotPregnant,
}

impl PregnancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PregnancyStatus::Unknown => "Unknown",
            PregnancyStatus::Confirmed => "Confirmed",
            PregnancyStatus::NotPregnant => "NotPregnant",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "Confirmed" => PregnancyStatus::Confirmed,
            "NotPregnant" => PregnancyStatus::NotPregnant,
            _ => PregnancyStatus::Unknown,
        }
    }
}

/// One appended fetal monitoring row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregnancyStat {
    pub animal_id: String,
    pub recorded_at: DateTime<Utc>,
    pub fetal_heart_rate: f64,
    pub temperature: Option<f64>,
    pub heart_rate: Option<f64>,
    pub activity: Option<f64>,
    pub notes: Option<String>,
}

/// Repository for reading and writing herd data to SQLite.
pub struct HerdRepository {
    pool: SqlitePool,
}

impl HerdRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- Devices ----

    /// Fetch a device by id, or `None` when unregistered.
    pub async fn find_device(&self, device_id: &str) -> Result<Option<Device>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT device_id, api_key_hash, animal_id, sensor_types, status, last_connected_at
             FROM devices WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            use sqlx::Row;
            let device_id: String = row.try_get("device_id").ok()?;
            let api_key_hash: String = row.try_get("api_key_hash").ok()?;
            let animal_id: Option<String> = row.try_get("animal_id").ok()?;
            let sensor_types_json: String = row.try_get("sensor_types").ok()?;
            let status: String = row.try_get("status").ok()?;
            let last_connected_at: Option<String> = row.try_get("last_connected_at").ok()?;

            Some(Device {
                device_id,
                api_key_hash,
                animal_id,
                sensor_types: serde_json::from_str(&sensor_types_json).unwrap_or_default(),
                status,
                last_connected_at: last_connected_at.and_then(parse_rfc3339),
            })
        }))
    }

    /// Register a device. Used by tests and seeding; device CRUD itself is
    /// handled outside the core.
    pub async fn insert_device(
        &self,
        device_id: &str,
        api_key_hash: &str,
        animal_id: Option<&str>,
        sensor_types: &[&str],
    ) -> Result<(), sqlx::Error> {
        let sensor_types_json =
            serde_json::to_string(sensor_types).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            "INSERT INTO devices (device_id, api_key_hash, animal_id, sensor_types)
             VALUES (?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(api_key_hash)
        .bind(animal_id)
        .bind(&sensor_types_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stamp a successful authentication.
    pub async fn touch_last_connected(&self, device_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE devices SET last_connected_at = ? WHERE device_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ---- Health samples ----

    pub async fn insert_health_sample(&self, sample: &HealthSample) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO health_samples (animal_id, recorded_at, temperature, heart_rate, activity)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&sample.animal_id)
        .bind(sample.recorded_at.to_rfc3339())
        .bind(sample.temperature)
        .bind(sample.heart_rate)
        .bind(sample.activity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Up to `limit` most recent samples for the animal, most-recent-first.
    pub async fn recent_health_samples(
        &self,
        animal_id: &str,
        limit: i64,
    ) -> Result<Vec<HealthSample>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT animal_id, recorded_at, temperature, heart_rate, activity
             FROM health_samples
             WHERE animal_id = ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(animal_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let samples = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let animal_id: String = row.try_get("animal_id").ok()?;
                let recorded_at: String = row.try_get("recorded_at").ok()?;
                let temperature: Option<f64> = row.try_get("temperature").ok()?;
                let heart_rate: Option<f64> = row.try_get("heart_rate").ok()?;
                let activity: Option<f64> = row.try_get("activity").ok()?;

                Some(HealthSample {
                    animal_id,
                    recorded_at: parse_rfc3339(recorded_at)?,
                    temperature,
                    heart_rate,
                    activity,
                })
            })
            .collect();

        Ok(samples)
    }

    /// Up to `limit` samples recorded strictly before `before`,
    /// most-recent-first. The anomaly detector's trailing window: history as
    /// of the assessed sample, excluding the sample itself.
    pub async fn health_samples_before(
        &self,
        animal_id: &str,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<HealthSample>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT animal_id, recorded_at, temperature, heart_rate, activity
             FROM health_samples
             WHERE animal_id = ? AND recorded_at < ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(animal_id)
        .bind(before.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let samples = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let animal_id: String = row.try_get("animal_id").ok()?;
                let recorded_at: String = row.try_get("recorded_at").ok()?;
                let temperature: Option<f64> = row.try_get("temperature").ok()?;
                let heart_rate: Option<f64> = row.try_get("heart_rate").ok()?;
                let activity: Option<f64> = row.try_get("activity").ok()?;

                Some(HealthSample {
                    animal_id,
                    recorded_at: parse_rfc3339(recorded_at)?,
                    temperature,
                    heart_rate,
                    activity,
                })
            })
            .collect();

        Ok(samples)
    }

    // ---- Pregnancy records ----

    pub async fn pregnancy_record(
        &self,
        animal_id: &str,
    ) -> Result<Option<PregnancyRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT animal_id, status, gestation_days, expected_due_date, last_checkup
             FROM pregnancy_records WHERE animal_id = ?",
        )
        .bind(animal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            use sqlx::Row;
            let animal_id: String = row.try_get("animal_id").ok()?;
            let status: String = row.try_get("status").ok()?;
            let gestation_days: i64 = row.try_get("gestation_days").ok()?;
            let expected_due_date: Option<String> = row.try_get("expected_due_date").ok()?;
            let last_checkup: Option<String> = row.try_get("last_checkup").ok()?;

            Some(PregnancyRecord {
                animal_id,
                status: PregnancyStatus::parse(&status),
                gestation_days,
                expected_due_date: expected_due_date.and_then(parse_rfc3339),
                last_checkup: last_checkup.and_then(parse_rfc3339),
            })
        }))
    }

    /// Insert or replace the record for an animal. Used by tests and
    /// seeding; the core treats records as read-only.
    pub async fn upsert_pregnancy_record(
        &self,
        record: &PregnancyRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO pregnancy_records
             (animal_id, status, gestation_days, expected_due_date, last_checkup)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(animal_id) DO UPDATE SET
                status = excluded.status,
                gestation_days = excluded.gestation_days,
                expected_due_date = excluded.expected_due_date,
                last_checkup = excluded.last_checkup",
        )
        .bind(&record.animal_id)
        .bind(record.status.as_str())
        .bind(record.gestation_days)
        .bind(record.expected_due_date.map(|d| d.to_rfc3339()))
        .bind(record.last_checkup.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- Pregnancy stats ----

    pub async fn insert_pregnancy_stat(&self, stat: &PregnancyStat) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO pregnancy_stats
             (animal_id, recorded_at, fetal_heart_rate, temperature, heart_rate, activity, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stat.animal_id)
        .bind(stat.recorded_at.to_rfc3339())
        .bind(stat.fetal_heart_rate)
        .bind(stat.temperature)
        .bind(stat.heart_rate)
        .bind(stat.activity)
        .bind(&stat.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Up to `limit` most recent stats for the animal, most-recent-first.
    pub async fn recent_pregnancy_stats(
        &self,
        animal_id: &str,
        limit: i64,
    ) -> Result<Vec<PregnancyStat>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT animal_id, recorded_at, fetal_heart_rate, temperature, heart_rate, activity, notes
             FROM pregnancy_stats
             WHERE animal_id = ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(animal_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let stats = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let animal_id: String = row.try_get("animal_id").ok()?;
                let recorded_at: String = row.try_get("recorded_at").ok()?;
                let fetal_heart_rate: f64 = row.try_get("fetal_heart_rate").ok()?;
                let temperature: Option<f64> = row.try_get("temperature").ok()?;
                let heart_rate: Option<f64> = row.try_get("heart_rate").ok()?;
                let activity: Option<f64> = row.try_get("activity").ok()?;
                let notes: Option<String> = row.try_get("notes").ok()?;

                Some(PregnancyStat {
                    animal_id,
                    recorded_at: parse_rfc3339(recorded_at)?,
                    fetal_heart_rate,
                    temperature,
                    heart_rate,
                    activity,
                    notes,
                })
            })
            .collect();

        Ok(stats)
    }
}

fn parse_rfc3339(value: impl AsRef<str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_ref())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::db::create_pool;

    async fn make_repo() -> HerdRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        HerdRepository::new(pool)
    }

    fn make_sample(animal_id: &str, temperature: f64, minutes_ago: i64) -> HealthSample {
        HealthSample {
            animal_id: animal_id.to_string(),
            recorded_at: Utc::now() - Duration::minutes(minutes_ago),
            temperature: Some(temperature),
            heart_rate: Some(72.0),
            activity: Some(6.0),
        }
    }

    fn make_stat(animal_id: &str, fhr: f64, minutes_ago: i64) -> PregnancyStat {
        PregnancyStat {
            animal_id: animal_id.to_string(),
            recorded_at: Utc::now() - Duration::minutes(minutes_ago),
            fetal_heart_rate: fhr,
            temperature: None,
            heart_rate: None,
            activity: None,
            notes: None,
        }
    }

    // ---- devices ----

    #[tokio::test]
    async fn find_device_returns_none_for_unknown_id() {
        let repo = make_repo().await;
        assert!(repo.find_device("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_and_find_device_roundtrip() {
        let repo = make_repo().await;
        repo.insert_device("collar-7", "abc123", Some("A1"), &["DHT11", "HEALTH"])
            .await
            .unwrap();

        let device = repo.find_device("collar-7").await.unwrap().unwrap();
        assert_eq!(device.device_id, "collar-7");
        assert_eq!(device.api_key_hash, "abc123");
        assert_eq!(device.animal_id.as_deref(), Some("A1"));
        assert_eq!(device.sensor_types, vec!["DHT11", "HEALTH"]);
        assert!(device.last_connected_at.is_none());
    }

    #[tokio::test]
    async fn touch_last_connected_sets_timestamp() {
        let repo = make_repo().await;
        repo.insert_device("collar-7", "abc123", None, &[])
            .await
            .unwrap();

        repo.touch_last_connected("collar-7").await.unwrap();

        let device = repo.find_device("collar-7").await.unwrap().unwrap();
        let stamped = device.last_connected_at.expect("timestamp missing");
        assert!((Utc::now() - stamped).num_seconds() < 5);
    }

    // ---- health samples ----

    #[tokio::test]
    async fn recent_health_samples_are_most_recent_first_and_limited() {
        let repo = make_repo().await;
        for (i, minutes_ago) in [50, 40, 30, 20, 10].iter().enumerate() {
            repo.insert_health_sample(&make_sample("A1", 38.0 + i as f64 * 0.1, *minutes_ago))
                .await
                .unwrap();
        }

        let samples = repo.recent_health_samples("A1", 3).await.unwrap();
        assert_eq!(samples.len(), 3);
        // Most recent sample (10 minutes ago) has the highest temperature.
        assert_eq!(samples[0].temperature, Some(38.4));
        assert!(samples[0].recorded_at > samples[1].recorded_at);
        assert!(samples[1].recorded_at > samples[2].recorded_at);
    }

    #[tokio::test]
    async fn health_samples_are_scoped_per_animal() {
        let repo = make_repo().await;
        repo.insert_health_sample(&make_sample("A1", 38.5, 5))
            .await
            .unwrap();
        repo.insert_health_sample(&make_sample("A2", 39.0, 5))
            .await
            .unwrap();

        let samples = repo.recent_health_samples("A1", 10).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].animal_id, "A1");
    }

    #[tokio::test]
    async fn repeated_inserts_append_rather_than_upsert() {
        let repo = make_repo().await;
        repo.insert_health_sample(&make_sample("A1", 38.5, 1))
            .await
            .unwrap();
        repo.insert_health_sample(&make_sample("A1", 38.5, 1))
            .await
            .unwrap();

        let samples = repo.recent_health_samples("A1", 10).await.unwrap();
        assert_eq!(samples.len(), 2);
    }

    #[tokio::test]
    async fn health_samples_before_excludes_the_cutoff_row() {
        let repo = make_repo().await;
        let cutoff = Utc::now();
        repo.insert_health_sample(&make_sample("A1", 38.2, 30))
            .await
            .unwrap();
        repo.insert_health_sample(&make_sample("A1", 38.4, 10))
            .await
            .unwrap();
        // Row at exactly the cutoff must not appear in the window.
        repo.insert_health_sample(&HealthSample {
            animal_id: "A1".to_string(),
            recorded_at: cutoff,
            temperature: Some(40.0),
            heart_rate: None,
            activity: None,
        })
        .await
        .unwrap();

        let history = repo.health_samples_before("A1", cutoff, 7).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].temperature, Some(38.4));
    }

    // ---- pregnancy records ----

    #[tokio::test]
    async fn pregnancy_record_roundtrip_and_status_parsing() {
        let repo = make_repo().await;
        let record = PregnancyRecord {
            animal_id: "A1".to_string(),
            status: PregnancyStatus::Confirmed,
            gestation_days: 130,
            expected_due_date: Some(Utc::now() + Duration::days(155)),
            last_checkup: None,
        };
        repo.upsert_pregnancy_record(&record).await.unwrap();

        let fetched = repo.pregnancy_record("A1").await.unwrap().unwrap();
        assert_eq!(fetched.status, PregnancyStatus::Confirmed);
        assert_eq!(fetched.gestation_days, 130);
        assert!(fetched.expected_due_date.is_some());
    }

    #[tokio::test]
    async fn pregnancy_record_missing_returns_none() {
        let repo = make_repo().await;
        assert!(repo.pregnancy_record("A9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let repo = make_repo().await;
        let mut record = PregnancyRecord {
            animal_id: "A1".to_string(),
            status: PregnancyStatus::Unknown,
            gestation_days: 0,
            expected_due_date: None,
            last_checkup: None,
        };
        repo.upsert_pregnancy_record(&record).await.unwrap();

        record.status = PregnancyStatus::Confirmed;
        record.gestation_days = 60;
        repo.upsert_pregnancy_record(&record).await.unwrap();

        let fetched = repo.pregnancy_record("A1").await.unwrap().unwrap();
        assert_eq!(fetched.status, PregnancyStatus::Confirmed);
        assert_eq!(fetched.gestation_days, 60);
    }

    // ---- pregnancy stats ----

    #[tokio::test]
    async fn recent_pregnancy_stats_most_recent_first() {
        let repo = make_repo().await;
        for (fhr, minutes_ago) in [(150.0, 5), (155.0, 10), (160.0, 15), (165.0, 20)] {
            repo.insert_pregnancy_stat(&make_stat("A1", fhr, minutes_ago))
                .await
                .unwrap();
        }

        let stats = repo.recent_pregnancy_stats("A1", 7).await.unwrap();
        assert_eq!(stats.len(), 4);
        assert_eq!(stats[0].fetal_heart_rate, 150.0);
        assert_eq!(stats[3].fetal_heart_rate, 165.0);
    }
}
