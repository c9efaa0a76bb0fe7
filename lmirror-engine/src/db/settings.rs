//! Settings database access
//!
//! Read/write practice settings from the settings table (key-value store).
//! Missing values fall back to built-in defaults and are written back, so
//! the table always shows what the engine actually used.

use crate::error::{Error, Result};
use lmirror_common::db::{DEFAULT_EVENT_BUS_CAPACITY, DEFAULT_TIME_UPDATE_INTERVAL_MS};
use lmirror_common::models::PracticeConfiguration;
use lmirror_common::SpeedMode;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{info, warn};

/// Keys that make up a `PracticeConfiguration`
pub const PRACTICE_SETTING_KEYS: &[&str] = &[
    "global_repeats",
    "gap_seconds",
    "inter_clip_gap_seconds",
    "preroll_ms",
    "min_speed",
    "max_speed",
    "speed_mode",
    "speed_mode_n",
];

/// Load the practice configuration snapshot used by `start()`/`resume()`
///
/// Each missing key is filled from `PracticeConfiguration::default()` and
/// written back. The assembled configuration is validated; a stored
/// combination that fails validation is a configuration error.
pub async fn load_practice_configuration(db: &Pool<Sqlite>) -> Result<PracticeConfiguration> {
    let defaults = PracticeConfiguration::default();

    let config = PracticeConfiguration {
        global_repeats: get_or_init(db, "global_repeats", defaults.global_repeats).await?,
        gap_seconds: get_or_init(db, "gap_seconds", defaults.gap_seconds).await?,
        inter_clip_gap_seconds: get_or_init(
            db,
            "inter_clip_gap_seconds",
            defaults.inter_clip_gap_seconds,
        )
        .await?,
        preroll_ms: get_or_init(db, "preroll_ms", defaults.preroll_ms).await?,
        min_speed: get_or_init(db, "min_speed", defaults.min_speed).await?,
        max_speed: get_or_init(db, "max_speed", defaults.max_speed).await?,
        speed_mode: get_or_init(db, "speed_mode", defaults.speed_mode).await?,
        speed_mode_n: get_or_init(db, "speed_mode_n", defaults.speed_mode_n).await?,
    };

    config
        .validate()
        .map_err(|e| Error::Config(format!("Stored practice settings invalid: {}", e)))?;

    Ok(config)
}

/// Persist every field of a practice configuration
pub async fn save_practice_configuration(
    db: &Pool<Sqlite>,
    config: &PracticeConfiguration,
) -> Result<()> {
    config.validate()?;

    set_setting(db, "global_repeats", config.global_repeats).await?;
    set_setting(db, "gap_seconds", config.gap_seconds).await?;
    set_setting(db, "inter_clip_gap_seconds", config.inter_clip_gap_seconds).await?;
    set_setting(db, "preroll_ms", config.preroll_ms).await?;
    set_setting(db, "min_speed", config.min_speed).await?;
    set_setting(db, "max_speed", config.max_speed).await?;
    set_setting(db, "speed_mode", config.speed_mode.to_db_string()).await?;
    set_setting(db, "speed_mode_n", config.speed_mode_n).await?;

    info!("Saved practice configuration");
    Ok(())
}

/// Update one practice setting from its string form
///
/// The value is parsed with the field's type and the resulting
/// configuration must still validate; otherwise nothing is written.
pub async fn update_practice_setting(db: &Pool<Sqlite>, key: &str, value: &str) -> Result<()> {
    let mut config = load_practice_configuration(db).await?;

    fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
        value
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("Invalid value for '{}': {}", key, value)))
    }

    match key {
        "global_repeats" => config.global_repeats = parse(key, value)?,
        "gap_seconds" => config.gap_seconds = parse(key, value)?,
        "inter_clip_gap_seconds" => config.inter_clip_gap_seconds = parse(key, value)?,
        "preroll_ms" => config.preroll_ms = parse(key, value)?,
        "min_speed" => config.min_speed = parse(key, value)?,
        "max_speed" => config.max_speed = parse(key, value)?,
        "speed_mode" => config.speed_mode = parse::<SpeedMode>(key, value)?,
        "speed_mode_n" => config.speed_mode_n = parse(key, value)?,
        "time_update_interval_ms" => {
            let ms: u64 = parse(key, value)?;
            return set_setting(db, key, ms.max(1)).await;
        }
        "event_bus_capacity" => {
            let capacity: usize = parse(key, value)?;
            return set_setting(db, key, capacity.max(1)).await;
        }
        _ => return Err(Error::Config(format!("Unknown setting '{}'", key))),
    }

    save_practice_configuration(db, &config).await
}

/// Interval between `TimeUpdate` events (milliseconds, at least 1)
pub async fn get_time_update_interval_ms(db: &Pool<Sqlite>) -> Result<u64> {
    let ms = get_or_init(db, "time_update_interval_ms", DEFAULT_TIME_UPDATE_INTERVAL_MS).await?;
    Ok(ms.max(1))
}

/// Per-subscriber EventBus buffer size
pub async fn get_event_bus_capacity(db: &Pool<Sqlite>) -> Result<usize> {
    let capacity = get_or_init(db, "event_bus_capacity", DEFAULT_EVENT_BUS_CAPACITY).await?;
    Ok(capacity.max(1))
}

/// Read a setting, writing `default` back when it is missing or unparsable
async fn get_or_init<T>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
{
    match get_setting::<T>(db, key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => {
            info!("Setting '{}' not found in database, using default: {}", key, default.to_string());
            set_setting(db, key, default.to_string()).await?;
            Ok(default)
        }
        Err(Error::Config(msg)) => {
            warn!("{}; resetting to default {}", msg, default.to_string());
            set_setting(db, key, default.to_string()).await?;
            Ok(default)
        }
        Err(e) => Err(e),
    }
}

/// Generic setting getter
///
/// Returns `Ok(None)` for a missing key or NULL value.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(s) => match s.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        lmirror_common::db::create_settings_table(&pool)
            .await
            .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_load_writes_defaults_back() {
        let db = setup_test_db().await;

        let config = load_practice_configuration(&db).await.unwrap();
        assert_eq!(config, PracticeConfiguration::default());

        let stored: Option<String> = get_setting(&db, "speed_mode").await.unwrap();
        assert_eq!(stored.as_deref(), Some("constant_min"));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let db = setup_test_db().await;
        let config = PracticeConfiguration {
            global_repeats: 5,
            gap_seconds: 0.25,
            inter_clip_gap_seconds: 2.0,
            preroll_ms: 0,
            min_speed: 0.6,
            max_speed: 1.3,
            speed_mode: SpeedMode::LinearThenMax,
            speed_mode_n: 3,
        };

        save_practice_configuration(&db, &config).await.unwrap();
        let loaded = load_practice_configuration(&db).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_unparsable_value_reset_to_default() {
        let db = setup_test_db().await;
        set_setting(&db, "global_repeats", "many").await.unwrap();

        let config = load_practice_configuration(&db).await.unwrap();
        assert_eq!(config.global_repeats, 3);

        let stored: Option<u32> = get_setting(&db, "global_repeats").await.unwrap();
        assert_eq!(stored, Some(3));
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_combination() {
        let db = setup_test_db().await;
        load_practice_configuration(&db).await.unwrap();

        // min above the default max of 1.0
        assert!(update_practice_setting(&db, "min_speed", "1.5").await.is_err());
        let config = load_practice_configuration(&db).await.unwrap();
        assert_eq!(config.min_speed, 0.8);

        update_practice_setting(&db, "speed_mode", "minThenLinear")
            .await
            .unwrap();
        let config = load_practice_configuration(&db).await.unwrap();
        assert_eq!(config.speed_mode, SpeedMode::MinThenLinear);

        assert!(update_practice_setting(&db, "volume", "1").await.is_err());
    }

    #[tokio::test]
    async fn test_update_rejects_oversized_waits() {
        let db = setup_test_db().await;
        load_practice_configuration(&db).await.unwrap();

        assert!(update_practice_setting(&db, "gap_seconds", "1e30").await.is_err());
        assert!(update_practice_setting(&db, "inter_clip_gap_seconds", "7200")
            .await
            .is_err());
        assert!(update_practice_setting(&db, "preroll_ms", "600000").await.is_err());

        let config = load_practice_configuration(&db).await.unwrap();
        assert_eq!(config, PracticeConfiguration::default());
    }

    #[tokio::test]
    async fn test_engine_tuning_settings() {
        let db = setup_test_db().await;
        assert_eq!(
            get_time_update_interval_ms(&db).await.unwrap(),
            DEFAULT_TIME_UPDATE_INTERVAL_MS
        );
        update_practice_setting(&db, "time_update_interval_ms", "0")
            .await
            .unwrap();
        assert_eq!(get_time_update_interval_ms(&db).await.unwrap(), 1);
        assert_eq!(
            get_event_bus_capacity(&db).await.unwrap(),
            DEFAULT_EVENT_BUS_CAPACITY
        );
    }
}
