//! Database initialization
//!
//! Creates the SQLite file on first run and brings the schema up to date.
//! Every statement is idempotent, so opening an existing database is the
//! same call as creating a new one.

use crate::models::PracticeConfiguration;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Default interval between `TimeUpdate` events
pub const DEFAULT_TIME_UPDATE_INTERVAL_MS: u64 = 250;

/// Default per-subscriber EventBus buffer
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_connection(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// Apply pragmas and create all tables on an already-open pool
///
/// Used directly by tests that run against `sqlite::memory:`.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_practice_sessions_table(pool).await?;
    init_default_settings(pool).await?;
    Ok(())
}

async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL lets the CLI's `recent` listing read while a practice run writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the practice_sessions table
///
/// One row per session. `last_updated_at` holds fixed-width RFC 3339 text so
/// lexical order is chronological order.
pub async fn create_practice_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS practice_sessions (
            id TEXT PRIMARY KEY,
            pack_id TEXT NOT NULL,
            track_id TEXT NOT NULL,
            practice_set_id TEXT NOT NULL,
            current_clip_index INTEGER NOT NULL DEFAULT 0,
            current_loop_count INTEGER NOT NULL DEFAULT 0,
            current_speed REAL NOT NULL DEFAULT 1.0,
            clip_play_counts TEXT NOT NULL DEFAULT '{}',
            forever_mode INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_practice_sessions_key \
         ON practice_sessions(pack_id, track_id, practice_set_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_practice_sessions_updated \
         ON practice_sessions(last_updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure every practice setting exists, resetting NULL values to defaults
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    let defaults = PracticeConfiguration::default();

    ensure_setting(pool, "global_repeats", &defaults.global_repeats.to_string()).await?;
    ensure_setting(pool, "gap_seconds", &defaults.gap_seconds.to_string()).await?;
    ensure_setting(
        pool,
        "inter_clip_gap_seconds",
        &defaults.inter_clip_gap_seconds.to_string(),
    )
    .await?;
    ensure_setting(pool, "preroll_ms", &defaults.preroll_ms.to_string()).await?;
    ensure_setting(pool, "min_speed", &defaults.min_speed.to_string()).await?;
    ensure_setting(pool, "max_speed", &defaults.max_speed.to_string()).await?;
    ensure_setting(pool, "speed_mode", defaults.speed_mode.to_db_string()).await?;
    ensure_setting(pool, "speed_mode_n", &defaults.speed_mode_n.to_string()).await?;

    ensure_setting(
        pool,
        "time_update_interval_ms",
        &DEFAULT_TIME_UPDATE_INTERVAL_MS.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "event_bus_capacity",
        &DEFAULT_EVENT_BUS_CAPACITY.to_string(),
    )
    .await?;

    Ok(())
}

/// Insert a setting if missing; reset it if present but NULL
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match existing {
        None => {
            // INSERT OR IGNORE: two processes may initialize concurrently
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query(
                "UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?",
            )
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}
