//! Errors raised while loading configuration, opening the practice database,
//! or validating practice data.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Practice database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Config file or database directory could not be read or created
    #[error("File access failed: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML or an unusable setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Practice configuration or clip data outside its allowed range
    #[error("Invalid practice data: {0}")]
    InvalidInput(String),
}
