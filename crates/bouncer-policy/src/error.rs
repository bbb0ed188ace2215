//! Error types for rule loading and evaluation.

use thiserror::Error;

/// Errors from the compliance/risk rule engines.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A rule file could not be read.
    #[error("failed to read rule file {path}: {source}")]
    RuleFileRead {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A rule file could not be parsed.
    #[error("failed to parse rule file: {0}")]
    RuleFileParse(#[from] toml::de::Error),

    /// A fail-closed rule carries a pattern the regex engine rejects.
    #[error("rule '{rule_id}' has an invalid pattern: {message}")]
    InvalidPattern {
        /// The offending rule.
        rule_id: String,
        /// Engine error text.
        message: String,
    },
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
