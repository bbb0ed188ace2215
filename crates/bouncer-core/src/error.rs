//! The user-facing error taxonomy.
//!
//! Every error the gateway surfaces to an agent maps onto one of these
//! variants; `status_code` gives the HTTP-equivalent code for transports
//! that want one. Internal failures collapse into [`GatewayError::Internal`]
//! with a generic body — details go to the audit trail, never to the caller.

use thiserror::Error;

/// Errors surfaced to the agent-facing API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed command (quoting, unknown program, empty input).
    #[error("parse error: {0}")]
    Parse(String),

    /// Bad request secret or callback secret.
    #[error("not authorized")]
    Auth,

    /// The command matched the blocklist.
    #[error("blocked: {reason}")]
    Blocked {
        /// Why the command was blocked.
        reason: String,
        /// What the caller should do instead.
        suggestion: String,
    },

    /// A CRITICAL compliance rule matched.
    #[error("compliance rejected by rule {rule_id}: {message}")]
    ComplianceRejected {
        /// Identifier of the matching rule.
        rule_id: String,
        /// Human-readable rule message.
        message: String,
    },

    /// Too many requests from this source in the current window.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Unknown request, grant, page, or account id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with current state (running deploy,
    /// duplicate grant execution).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Fail-closed fall-through. The message is generic by design.
    #[error("internal error")]
    Internal,
}

impl GatewayError {
    /// HTTP-equivalent status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Parse(_) => 400,
            Self::Auth => 401,
            Self::Blocked { .. } | Self::ComplianceRejected { .. } => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited(_) => 429,
            Self::Internal => 500,
        }
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Parse("x".into()).status_code(), 400);
        assert_eq!(GatewayError::Auth.status_code(), 401);
        assert_eq!(
            GatewayError::Blocked {
                reason: "r".into(),
                suggestion: "s".into()
            }
            .status_code(),
            403
        );
        assert_eq!(GatewayError::RateLimited("w".into()).status_code(), 429);
        assert_eq!(GatewayError::Internal.status_code(), 500);
    }

    #[test]
    fn test_internal_message_is_generic() {
        assert_eq!(GatewayError::Internal.to_string(), "internal error");
    }
}
