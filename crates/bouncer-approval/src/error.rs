//! Error types for approval records and session managers.

use thiserror::Error;

use crate::store::StoreError;

/// Errors from record construction and the trust/grant managers.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// A request-time validation failed (empty command list, bad TTL, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A grant pattern failed the compile-time guards.
    #[error("invalid grant pattern: {0}")]
    Pattern(String),

    /// The grant bundle contains commands that can never be granted.
    #[error("grant rejected: {0}")]
    GrantRejected(String),

    /// The referenced grant does not exist or is not visible to the caller.
    #[error("grant not found")]
    GrantNotFound,

    /// The grant exists but cannot authorize this execution.
    #[error("grant cannot authorize execution: {0}")]
    GrantRefused(String),

    /// The underlying store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
