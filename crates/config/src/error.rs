//! Failure cases for loading and validating configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between a `meridian.toml` on disk and a
/// validated [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written
    #[error("failed to write config file at {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The content is not valid TOML for this schema
    #[error("failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The configuration could not be rendered back to TOML
    #[error("failed to serialize TOML config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// `chain_id` is zero
    #[error("invalid chain id: chain_id must be non-zero")]
    InvalidChainId,

    /// The production slot length is zero
    #[error("invalid block period: period must be at least 1 second, got {0}")]
    InvalidPeriod(u64),

    /// The roster size is zero
    #[error("invalid witness count: witnesses_num must be non-zero")]
    NoWitnesses,

    /// The log level is not one tracing understands
    #[error("invalid log level: {0}. valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// The log format is not supported
    #[error("invalid log format: {0}. valid values: json, pretty")]
    InvalidLogFormat(String),
}

/// Shorthand for results carrying a [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;
