//! Telegram adapter errors.

use thiserror::Error;

/// Errors from the Telegram transport.
#[derive(Debug, Error)]
pub enum TelegramNotifierError {
    /// The Telegram API call failed.
    #[error("telegram api error: {0}")]
    Api(String),

    /// A message handle did not come from this adapter.
    #[error("malformed message id: {0}")]
    BadMessageId(String),
}
