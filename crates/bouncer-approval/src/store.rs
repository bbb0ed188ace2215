//! The store contract.
//!
//! The store is the only authoritative shared resource in the gateway.
//! Every status change is a conditional update (`transition`), and every
//! budget increment is a check-and-consume executed inside the store —
//! reading a counter and writing it back from application memory is
//! forbidden by design.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bouncer_core::{GrantId, MessageId, PageId, RequestId, RequestStatus, Timestamp, TrustId};

use crate::grant::GrantSession;
use crate::record::{ApprovalRequest, RecordPatch};
use crate::trust::TrustSession;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `put_new` for an id that already exists.
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// The status machine forbids the requested edge.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: RequestStatus,
        /// Requested status.
        to: RequestStatus,
    },

    /// The backend is unreachable or failing.
    ///
    /// Callers decide the failure direction: the rate limiter fails closed
    /// to `rate_limited`, the trust/grant consumers fall through to manual.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a conditional status transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The compare-and-swap succeeded; the updated record is returned.
    Applied(Box<ApprovalRequest>),
    /// Another actor changed the record first (or the record is missing).
    Conflict,
}

impl TransitionOutcome {
    /// The updated record, if the transition applied.
    #[must_use]
    pub fn applied(self) -> Option<ApprovalRequest> {
        match self {
            Self::Applied(record) => Some(*record),
            Self::Conflict => None,
        }
    }
}

/// What a trust check-and-consume wants to spend.
#[derive(Debug, Clone, Copy)]
pub enum TrustConsume {
    /// One command execution.
    Command,
    /// One upload of the given size.
    Upload {
        /// Size of the upload in bytes.
        bytes: u64,
    },
}

/// Outcome of an atomic budget consumption.
#[derive(Debug, Clone)]
pub enum ConsumeOutcome<T> {
    /// The conditional update succeeded; snapshot after the increment.
    Consumed(Box<T>),
    /// The condition failed (inactive, expired, budget exhausted, entry
    /// already used). The reason is for logs and fall-through messages.
    Denied(String),
}

impl<T> ConsumeOutcome<T> {
    /// The post-increment snapshot, if consumed.
    #[must_use]
    pub fn consumed(self) -> Option<T> {
        match self {
            Self::Consumed(snapshot) => Some(*snapshot),
            Self::Denied(_) => None,
        }
    }
}

/// A stored page of a long command result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Addressable page id (`{request_id}:page:{k}`).
    pub page_id: PageId,
    /// Page content.
    pub content: String,
    /// 1-based page number.
    pub page: u32,
    /// Total number of pages for the original output.
    pub total_pages: u32,
    /// When this page stops being retrievable.
    pub expires_at: Timestamp,
}

/// The persistent state behind the gateway.
///
/// Implementations must make `transition`, `consume_trust`,
/// `consume_grant`, and `increment_rate` genuinely atomic: concurrent
/// callers must never both succeed past a budget or status condition.
#[async_trait]
pub trait Store: Send + Sync {
    // -- approval records ---------------------------------------------------

    /// Create a record. Fails if the id exists.
    async fn put_new(&self, record: ApprovalRequest) -> StoreResult<()>;

    /// Fetch a record.
    async fn get(&self, id: &RequestId) -> StoreResult<Option<ApprovalRequest>>;

    /// Delete a record outright (orphan cleanup after a failed notification).
    async fn delete(&self, id: &RequestId) -> StoreResult<()>;

    /// Bind the chat message posted for a record.
    async fn set_message_id(&self, id: &RequestId, message_id: MessageId) -> StoreResult<()>;

    /// Conditionally move a record from `from` to `to`, applying `patch`.
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the status machine
    /// forbids the edge; returns [`TransitionOutcome::Conflict`] when the
    /// record is not currently in `from`.
    async fn transition(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        patch: RecordPatch,
    ) -> StoreResult<TransitionOutcome>;

    /// Pending records, oldest first, optionally filtered by source.
    async fn list_pending(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ApprovalRequest>>;

    /// Pending records for a trust scope/account pair, oldest first.
    async fn list_pending_for_trust(
        &self,
        trust_scope: &str,
        account_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ApprovalRequest>>;

    /// Number of pending records for a source.
    async fn count_pending(&self, source: &str) -> StoreResult<u32>;

    /// Look up a prior submission by caller idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<RequestId>>;

    // -- trust sessions -----------------------------------------------------

    /// Persist a trust session.
    async fn put_trust(&self, session: TrustSession) -> StoreResult<()>;

    /// Fetch a trust session by id.
    async fn get_trust(&self, id: &TrustId) -> StoreResult<Option<TrustSession>>;

    /// The active, unexpired session for a scope/account pair, if any.
    async fn active_trust(
        &self,
        trust_scope: &str,
        account_id: &str,
    ) -> StoreResult<Option<TrustSession>>;

    /// Atomically verify active + unexpired + budget, then increment.
    async fn consume_trust(
        &self,
        id: &TrustId,
        what: TrustConsume,
    ) -> StoreResult<ConsumeOutcome<TrustSession>>;

    /// Revoke a trust session. Returns false when it does not exist.
    async fn revoke_trust(&self, id: &TrustId) -> StoreResult<bool>;

    // -- grant sessions -----------------------------------------------------

    /// Persist a grant session.
    async fn put_grant(&self, session: GrantSession) -> StoreResult<()>;

    /// Fetch a grant session.
    async fn get_grant(&self, id: &GrantId) -> StoreResult<Option<GrantSession>>;

    /// Conditionally replace a pending grant with its decided form.
    ///
    /// Returns false when the grant is missing or no longer pending.
    async fn decide_grant(&self, decided: GrantSession) -> StoreResult<bool>;

    /// Atomically verify approved + unexpired + budgets, then mark
    /// `normalized_cmd` used and bump the execution counter.
    ///
    /// `dangerous` engages the repeat cap for `allow_repeat` sessions.
    async fn consume_grant(
        &self,
        id: &GrantId,
        normalized_cmd: &str,
        dangerous: bool,
    ) -> StoreResult<ConsumeOutcome<GrantSession>>;

    /// Revoke a grant session. Returns false when it does not exist.
    async fn revoke_grant(&self, id: &GrantId) -> StoreResult<bool>;

    // -- rate counters ------------------------------------------------------

    /// Increment the `(source, window_start)` counter and return the new
    /// count. Increment-only within a window.
    async fn increment_rate(&self, source: &str, window_start: i64) -> StoreResult<u32>;

    // -- pages --------------------------------------------------------------

    /// Persist a result page.
    async fn put_page(&self, page: PageRecord) -> StoreResult<()>;

    /// Fetch a result page; expired pages read as absent.
    async fn get_page(&self, id: &PageId) -> StoreResult<Option<PageRecord>>;

    // -- maintenance --------------------------------------------------------

    /// Drop records past `expires_at` plus their grace and pages past their
    /// TTL. Returns how many items were removed.
    async fn sweep_expired(&self, now: Timestamp) -> StoreResult<u32>;
}
