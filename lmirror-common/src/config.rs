//! Bootstrap configuration and root folder resolution
//!
//! Only the values needed before the database is open live here. Practice
//! settings are stored in the `settings` table.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the audio root folder
pub const ROOT_FOLDER_ENV: &str = "LMIRROR_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML
///
/// Read once at startup; changes need a restart.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (defaults to `<root>/lmirror.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Folder the track filenames are relative to
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load the config file if one exists, otherwise built-in defaults
    ///
    /// A missing file is not an error. A file that exists but does not
    /// parse is.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_file() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    get_default_root_folder()
}

/// Database path: CLI, then TOML, then `<root>/lmirror.db`
pub fn resolve_database_path(cli_arg: Option<&Path>, toml: &TomlConfig, root: &Path) -> PathBuf {
    cli_arg
        .map(Path::to_path_buf)
        .or_else(|| toml.database_path.clone())
        .unwrap_or_else(|| root.join("lmirror.db"))
}

/// Per-user config file location (`~/.config/lmirror/config.toml` on Linux)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lmirror").join("config.toml"))
}

/// Get OS-dependent default root folder path
pub fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lmirror"))
        .unwrap_or_else(|| PathBuf::from("./lmirror_data"))
}
