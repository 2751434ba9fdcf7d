//! SQLite pool construction.
//!
//! `create_pool` connects and applies the embedded schema so callers (and
//! tests, via `sqlite::memory:`) always see a ready database. Timestamps are
//! stored as RFC 3339 strings throughout.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// One statement per entry — SQLite executes them individually.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        device_id TEXT PRIMARY KEY,
        api_key_hash TEXT NOT NULL,
        animal_id TEXT,
        sensor_types TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL DEFAULT 'active',
        last_connected_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS health_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        animal_id TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        temperature REAL,
        heart_rate REAL,
        activity REAL
    )",
    "CREATE INDEX IF NOT EXISTS idx_health_samples_animal
        ON health_samples (animal_id, recorded_at DESC)",
    "CREATE TABLE IF NOT EXISTS pregnancy_records (
        animal_id TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'Unknown',
        gestation_days INTEGER NOT NULL DEFAULT 0,
        expected_due_date TEXT,
        last_checkup TEXT
    )",
    "CREATE TABLE IF NOT EXISTS pregnancy_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        animal_id TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        fetal_heart_rate REAL NOT NULL,
        temperature REAL,
        heart_rate REAL,
        activity REAL,
        notes TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_pregnancy_stats_animal
        ON pregnancy_stats (animal_id, recorded_at DESC)",
];

/// Connect to `database_url` and apply the schema.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    // An in-memory SQLite database exists per connection; a single
    // connection keeps every query on the same database.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}
