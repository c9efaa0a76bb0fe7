//! Configuration management for the practice engine
//!
//! Two tiers:
//! 1. **TOML bootstrap**: database path, root folder, log level (read once)
//! 2. **Database runtime**: practice settings and engine tuning from the
//!    `settings` table
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--root-folder, --database, --config)
//! 2. Environment variable (LMIRROR_ROOT_FOLDER)
//! 3. TOML configuration file
//! 4. Database settings table
//! 5. Built-in defaults (code constants)

use crate::db::settings;
use crate::error::Result;
use lmirror_common::config::{resolve_database_path, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV};
use lmirror_common::models::PracticeConfiguration;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Runtime settings loaded from database
///
/// Missing values are initialized with defaults and written back.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Snapshot handed to the scheduler at start/resume
    pub practice: PracticeConfiguration,

    /// Interval between `TimeUpdate` events
    pub time_update_interval_ms: u64,

    /// Per-subscriber EventBus buffer
    pub event_bus_capacity: usize,
}

impl RuntimeSettings {
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let settings = Self {
            practice: settings::load_practice_configuration(pool).await?,
            time_update_interval_ms: settings::get_time_update_interval_ms(pool).await?,
            event_bus_capacity: settings::get_event_bus_capacity(pool).await?,
        };
        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_interval_ms)
    }
}

/// Complete application configuration
///
/// Combines bootstrap (TOML) and runtime (database) configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,

    /// Folder holding the packs' audio files
    pub root_folder: PathBuf,

    pub log_level: String,

    pub db_pool: SqlitePool,

    pub runtime: RuntimeSettings,
}

impl Config {
    /// Load TOML bootstrap, open (or create) the database and read settings
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - An explicit or present TOML file cannot be read or parsed
    /// - The database cannot be opened or initialized
    /// - Stored practice settings fail validation
    pub async fn load(overrides: ConfigOverrides) -> Result<Self> {
        let toml_config = TomlConfig::load_or_default(overrides.config_file.as_deref())?;
        Self::from_toml(toml_config, overrides).await
    }

    /// Same as `load` with the TOML bootstrap already parsed
    ///
    /// The binary reads the TOML first so the log level applies before
    /// anything else logs.
    pub async fn from_toml(toml_config: TomlConfig, overrides: ConfigOverrides) -> Result<Self> {
        let root_folder =
            resolve_root_folder(overrides.root_folder.as_deref(), ROOT_FOLDER_ENV, &toml_config);
        info!("Root folder: {}", root_folder.display());

        let database_path =
            resolve_database_path(overrides.database_path.as_deref(), &toml_config, &root_folder);

        let db_pool = lmirror_common::db::init_database(&database_path).await?;
        info!("Connected to database: {}", database_path.display());

        let runtime = RuntimeSettings::load(&db_pool).await?;

        Ok(Config {
            database_path,
            root_folder,
            log_level: toml_config.logging.level,
            db_pool,
            runtime,
        })
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
}
