//! Trust sessions: short-lived, budget-bounded auto-approval envelopes.
//!
//! A trust session lets a specific `(trust_scope, account_id)` pair execute
//! further low-risk commands without a human in the loop, until its TTL or
//! one of its budgets runs out. Dangerous classes, blocked services, and
//! danger flags never ride a trust session, no matter the budget.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use bouncer_command::ClassifierRules;
use bouncer_core::{Timestamp, TrustId};

use crate::store::{ConsumeOutcome, Store, StoreResult, TrustConsume};

/// Lifecycle status of a trust session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustSessionStatus {
    /// Live; consumable until expiry or exhaustion.
    Active,
    /// Past its TTL.
    Expired,
    /// Ended early by an approver.
    Revoked,
}

/// Budgets granted to a new trust session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustBudgets {
    /// Session lifetime in seconds.
    pub ttl_seconds: u64,
    /// Maximum commands executed under the session.
    pub commands_max: u32,
    /// Maximum uploads (0 disables trust uploads).
    pub uploads_max: u32,
    /// Total upload bytes allowed.
    pub bytes_max: u64,
    /// Per-file upload byte cap.
    pub per_upload_bytes_max: u64,
}

impl Default for TrustBudgets {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            commands_max: 20,
            uploads_max: 5,
            bytes_max: 20 * 1024 * 1024,
            per_upload_bytes_max: 5 * 1024 * 1024,
        }
    }
}

/// A trust session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSession {
    /// Session id.
    pub trust_id: TrustId,
    /// Stable caller key the session is scoped to.
    pub trust_scope: String,
    /// Account the session is scoped to.
    pub account_id: String,
    /// Display source captured at creation (not used for matching).
    pub source: String,
    /// Approver who opened the session.
    pub approved_by: String,
    /// Lifecycle status.
    pub status: TrustSessionStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Expiry time (fixed at creation).
    pub expires_at: Timestamp,
    /// Commands consumed so far.
    pub commands_used: u32,
    /// Command budget.
    pub commands_max: u32,
    /// Uploads consumed so far.
    pub uploads_used: u32,
    /// Upload budget (0 disables trust uploads).
    pub uploads_max: u32,
    /// Upload bytes consumed so far.
    pub bytes_used: u64,
    /// Upload byte budget.
    pub bytes_max: u64,
    /// Per-file upload cap.
    pub per_upload_bytes_max: u64,
}

impl TrustSession {
    /// Build a fresh session for a scope/account pair.
    #[must_use]
    pub fn new(
        trust_scope: impl Into<String>,
        account_id: impl Into<String>,
        source: impl Into<String>,
        approved_by: impl Into<String>,
        budgets: TrustBudgets,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            trust_id: TrustId::new(),
            trust_scope: trust_scope.into(),
            account_id: account_id.into(),
            source: source.into(),
            approved_by: approved_by.into(),
            status: TrustSessionStatus::Active,
            created_at: now,
            expires_at: now.plus_seconds(budgets.ttl_seconds),
            commands_used: 0,
            commands_max: budgets.commands_max,
            uploads_used: 0,
            uploads_max: budgets.uploads_max,
            bytes_used: 0,
            bytes_max: budgets.bytes_max,
            per_upload_bytes_max: budgets.per_upload_bytes_max,
        }
    }

    /// Whether the session can still authorize anything at `now`.
    #[must_use]
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.status == TrustSessionStatus::Active && !self.expires_at.is_past(now)
    }

    /// Seconds left before expiry.
    #[must_use]
    pub fn remaining_seconds(&self, now: Timestamp) -> u64 {
        self.expires_at.seconds_until(now)
    }
}

/// What a trust check decided.
#[derive(Debug)]
pub enum TrustOutcome {
    /// Consume succeeded; snapshot is post-increment.
    Approved(Box<TrustSession>),
    /// Not trusted; the pipeline continues to the next stage. Carries the
    /// reason for the audit trail.
    FallThrough(String),
}

impl TrustOutcome {
    /// The session snapshot, if approved.
    #[must_use]
    pub fn approved(self) -> Option<TrustSession> {
        match self {
            Self::Approved(session) => Some(*session),
            Self::FallThrough(_) => None,
        }
    }
}

/// Filename rules for trust-approved uploads.
fn upload_filename_rejection(filename: &str, blocked_extensions: &[String]) -> Option<String> {
    if filename.is_empty() {
        return Some("empty filename".to_owned());
    }
    if filename.contains('\0') {
        return Some("filename contains NUL".to_owned());
    }
    if filename.contains("..") {
        return Some("filename contains path traversal".to_owned());
    }
    if filename.contains('/') || filename.contains('\\') {
        return Some("filename contains a directory separator".to_owned());
    }
    let lower = filename.to_lowercase();
    for ext in blocked_extensions {
        if lower.ends_with(ext.as_str()) {
            return Some(format!("file extension blocked: {ext}"));
        }
    }
    None
}

/// Trust session manager.
///
/// Owns no state beyond references to the store and the classifier rule
/// tables; every decision that matters happens as a conditional update in
/// the store.
pub struct TrustManager<S> {
    store: Arc<S>,
    rules: Arc<ClassifierRules>,
    blocked_extensions: Vec<String>,
}

impl<S: Store> TrustManager<S> {
    /// Create a manager over a store and classifier rule tables.
    #[must_use]
    pub fn new(store: Arc<S>, rules: Arc<ClassifierRules>, blocked_extensions: Vec<String>) -> Self {
        Self {
            store,
            rules,
            blocked_extensions,
        }
    }

    /// Open a trust session for a scope/account pair, or return the existing
    /// active one (at most one active session per pair).
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn begin(
        &self,
        trust_scope: &str,
        account_id: &str,
        source: &str,
        approved_by: &str,
        budgets: TrustBudgets,
    ) -> StoreResult<TrustSession> {
        if let Some(existing) = self.store.active_trust(trust_scope, account_id).await? {
            tracing::debug!(trust_id = %existing.trust_id, "reusing active trust session");
            return Ok(existing);
        }
        let session = TrustSession::new(trust_scope, account_id, source, approved_by, budgets);
        self.store.put_trust(session.clone()).await?;
        tracing::info!(
            trust_id = %session.trust_id,
            trust_scope,
            account_id,
            "trust session opened"
        );
        Ok(session)
    }

    /// Try to authorize a command under trust.
    ///
    /// Falls through (never errors) when there is no active session, the
    /// command is trust-excluded, the budget is exhausted, or the store
    /// fails: a broken store must land in human review, not auto-approval.
    pub async fn try_consume_command(
        &self,
        trust_scope: &str,
        account_id: &str,
        argv: &[String],
    ) -> TrustOutcome {
        let session = match self.store.active_trust(trust_scope, account_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return TrustOutcome::FallThrough("no active trust session".to_owned()),
            Err(e) => {
                tracing::warn!(error = %e, "trust lookup failed, falling through to manual");
                return TrustOutcome::FallThrough("trust store unavailable".to_owned());
            },
        };

        if let Some(reason) = self.rules.trust_exclusion_reason(argv) {
            return TrustOutcome::FallThrough(reason);
        }

        match self
            .store
            .consume_trust(&session.trust_id, TrustConsume::Command)
            .await
        {
            Ok(ConsumeOutcome::Consumed(snapshot)) => TrustOutcome::Approved(snapshot),
            Ok(ConsumeOutcome::Denied(reason)) => TrustOutcome::FallThrough(reason),
            Err(e) => {
                tracing::warn!(error = %e, "trust consume failed, falling through to manual");
                TrustOutcome::FallThrough("trust store unavailable".to_owned())
            },
        }
    }

    /// Try to authorize an upload under trust.
    pub async fn try_consume_upload(
        &self,
        trust_scope: &str,
        account_id: &str,
        filename: &str,
        size_bytes: u64,
    ) -> TrustOutcome {
        if let Some(reason) = upload_filename_rejection(filename, &self.blocked_extensions) {
            return TrustOutcome::FallThrough(reason);
        }

        let session = match self.store.active_trust(trust_scope, account_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return TrustOutcome::FallThrough("no active trust session".to_owned()),
            Err(e) => {
                tracing::warn!(error = %e, "trust lookup failed, falling through to manual");
                return TrustOutcome::FallThrough("trust store unavailable".to_owned());
            },
        };

        if session.uploads_max == 0 {
            return TrustOutcome::FallThrough("trust session has uploads disabled".to_owned());
        }
        if size_bytes > session.per_upload_bytes_max {
            return TrustOutcome::FallThrough(format!(
                "file too large for trust upload: {size_bytes} > {}",
                session.per_upload_bytes_max
            ));
        }

        match self
            .store
            .consume_trust(&session.trust_id, TrustConsume::Upload { bytes: size_bytes })
            .await
        {
            Ok(ConsumeOutcome::Consumed(snapshot)) => TrustOutcome::Approved(snapshot),
            Ok(ConsumeOutcome::Denied(reason)) => TrustOutcome::FallThrough(reason),
            Err(e) => {
                tracing::warn!(error = %e, "trust consume failed, falling through to manual");
                TrustOutcome::FallThrough("trust store unavailable".to_owned())
            },
        }
    }

    /// Revoke a session by id.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Returns `Ok(false)` for an unknown id.
    pub async fn revoke(&self, trust_id: &TrustId) -> StoreResult<bool> {
        let revoked = self.store.revoke_trust(trust_id).await?;
        if revoked {
            tracing::info!(%trust_id, "trust session revoked");
        }
        Ok(revoked)
    }

    /// The active session for a pair, if any.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn status(
        &self,
        trust_scope: &str,
        account_id: &str,
    ) -> StoreResult<Option<TrustSession>> {
        self.store.active_trust(trust_scope, account_id).await
    }
}
