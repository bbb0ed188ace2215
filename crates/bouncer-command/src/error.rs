//! Error types for command parsing and rule loading.

use thiserror::Error;

/// Errors from the parse/normalize/classify stages.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A quote was opened and never closed.
    #[error("unbalanced quote in command")]
    UnbalancedQuote,

    /// A trailing backslash escaped nothing.
    #[error("dangling escape at end of command")]
    DanglingEscape,

    /// The command was empty after normalization.
    #[error("empty command")]
    Empty,

    /// The first token is not the configured CLI program.
    #[error("unknown program '{got}', expected '{expected}'")]
    UnknownProgram {
        /// The token that was found.
        got: String,
        /// The configured CLI verb.
        expected: String,
    },

    /// A classifier rule file could not be read.
    #[error("failed to read rule file {path}: {source}")]
    RuleFileRead {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A classifier rule file could not be parsed.
    #[error("failed to parse rule file: {0}")]
    RuleFileParse(#[from] toml::de::Error),
}

/// Result alias for command operations.
pub type CommandResult<T> = Result<T, CommandError>;
