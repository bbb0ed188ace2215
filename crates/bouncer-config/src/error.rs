//! Configuration error types.

use thiserror::Error;

/// Errors from config loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config document could not be parsed.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Path (or `<embedded defaults>`).
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// The merged configuration is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
