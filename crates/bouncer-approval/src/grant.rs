//! Grant sessions: pre-approved command bundles.
//!
//! An agent asks for a bundle of specific commands up front; a human
//! approves the bundle (or only its safe subset); the agent then executes
//! entries from the bundle within a TTL and an execution budget. The TTL
//! counts from approval, not from request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use bouncer_command::{Classifier, normalize, split_argv};
use bouncer_core::{GrantId, Timestamp};
use bouncer_policy::{ComplianceChecker, RiskScorer};

use crate::error::{ApprovalError, ApprovalResult};
use crate::pattern::{GrantPattern, entry_matches};
use crate::store::{ConsumeOutcome, Store, StoreResult};

/// Risk score at or above which a command needs individual approval even
/// inside a grant bundle.
const GRANT_RISK_GATE: u8 = 66;

/// Lifecycle status of a grant session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Waiting for an approver decision.
    Pending,
    /// Approved; entries are executable until expiry or exhaustion.
    Approved,
    /// Denied by the approver.
    Denied,
    /// Past its TTL.
    Expired,
    /// Ended early.
    Revoked,
}

/// Pre-check category of one command in a grant request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantCategory {
    /// Coverable by a bundle approval.
    Grantable,
    /// Dangerous or high-risk; only `ApproveAll` includes it.
    RequiresIndividual,
    /// Can never be granted; poisons the whole request.
    Blocked,
}

/// Pre-check result for one command in the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantCommandDetail {
    /// The command as submitted.
    pub command: String,
    /// Normalized form used for matching.
    pub normalized: String,
    /// Pre-check category.
    pub category: GrantCategory,
    /// Risk score at request time.
    pub risk_score: u8,
    /// Why the command is not plainly grantable, if it is not.
    pub note: Option<String>,
}

/// Approver decision mode for a grant bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantApprovalMode {
    /// Grant every non-blocked entry, including `requires_individual` ones.
    All,
    /// Grant only the `grantable` entries.
    SafeOnly,
}

/// A grant session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSession {
    /// High-entropy session id.
    pub grant_id: GrantId,
    /// Requesting source; must match on execution and status queries.
    pub source: String,
    /// Target account.
    pub account_id: String,
    /// Caller-supplied justification.
    pub reason: String,
    /// Lifecycle status.
    pub status: GrantStatus,
    /// Pre-check results, in request order.
    pub commands_detail: Vec<GrantCommandDetail>,
    /// Authorized entries (normalized strings or patterns); set at approval.
    pub granted: Vec<String>,
    /// Execution counts per consumed entry.
    pub used: BTreeMap<String, u32>,
    /// Total executions so far.
    pub executions_used: u32,
    /// Total execution budget.
    pub max_executions: u32,
    /// Whether one entry may execute more than once.
    pub allow_repeat: bool,
    /// Requested TTL in minutes; counts from approval.
    pub ttl_minutes: u64,
    /// Creation time.
    pub created_at: Timestamp,
    /// Approval time, if decided.
    pub approved_at: Option<Timestamp>,
    /// While pending: the approval deadline. After approval: execution expiry.
    pub expires_at: Timestamp,
    /// Approver, if decided.
    pub approved_by: Option<String>,
}

impl GrantSession {
    /// Whether the session can authorize executions at `now`.
    #[must_use]
    pub fn is_executable(&self, now: Timestamp) -> bool {
        self.status == GrantStatus::Approved && !self.expires_at.is_past(now)
    }

    /// Seconds left before expiry.
    #[must_use]
    pub fn remaining_seconds(&self, now: Timestamp) -> u64 {
        self.expires_at.seconds_until(now)
    }
}

/// Projection returned by grant status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantStatusView {
    /// Session id.
    pub grant_id: GrantId,
    /// Lifecycle status (reported as expired once past TTL).
    pub status: GrantStatus,
    /// Number of authorized entries.
    pub granted_count: usize,
    /// Number of distinct entries consumed.
    pub used_count: usize,
    /// Total executions so far.
    pub executions_used: u32,
    /// Total execution budget.
    pub max_executions: u32,
    /// Seconds left before expiry.
    pub remaining_seconds: u64,
    /// Whether repeats are allowed.
    pub allow_repeat: bool,
}

/// Request-time limits for grant bundles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GrantLimits {
    /// Maximum commands per bundle.
    pub max_commands: usize,
    /// Maximum TTL in minutes.
    pub ttl_max_minutes: u64,
    /// Default TTL when the caller does not ask for one.
    pub default_ttl_minutes: u64,
    /// Total execution budget per session.
    pub max_executions: u32,
    /// Seconds a pending bundle waits for an approver.
    pub approval_timeout_seconds: u64,
}

impl Default for GrantLimits {
    fn default() -> Self {
        Self {
            max_commands: 20,
            ttl_max_minutes: 60,
            default_ttl_minutes: 30,
            max_executions: 50,
            approval_timeout_seconds: 300,
        }
    }
}

/// Grant session manager.
pub struct GrantManager<S> {
    store: Arc<S>,
    classifier: Arc<Classifier>,
    compliance: Arc<ComplianceChecker>,
    risk: Arc<RiskScorer>,
    limits: GrantLimits,
}

impl<S: Store> GrantManager<S> {
    /// Create a manager over the store and the policy engines.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        classifier: Arc<Classifier>,
        compliance: Arc<ComplianceChecker>,
        risk: Arc<RiskScorer>,
        limits: GrantLimits,
    ) -> Self {
        Self {
            store,
            classifier,
            compliance,
            risk,
            limits,
        }
    }

    /// Pre-check one command for a grant bundle.
    fn precheck(&self, raw: &str) -> GrantCommandDetail {
        let normalized = normalize(raw);
        let mut detail = GrantCommandDetail {
            command: raw.to_owned(),
            normalized: normalized.clone(),
            category: GrantCategory::Grantable,
            risk_score: 0,
            note: None,
        };

        let report = self.compliance.check_command(&normalized);
        if report.critical().is_some() {
            let finding = report.critical().map(|f| f.reason.clone()).unwrap_or_default();
            detail.category = GrantCategory::Blocked;
            detail.note = Some(format!("compliance violation: {finding}"));
            return detail;
        }

        let argv = match split_argv(&normalized) {
            Ok(argv) => argv,
            Err(e) => {
                detail.category = GrantCategory::RequiresIndividual;
                detail.note = Some(format!("unparseable command: {e}"));
                return detail;
            },
        };

        let classification = self.classifier.classify(&argv);
        if let bouncer_command::Classification::Blocked { reason, .. } = &classification {
            detail.category = GrantCategory::Blocked;
            detail.note = Some(reason.clone());
            return detail;
        }
        if classification.is_dangerous()
            || self
                .classifier
                .rules()
                .trust_exclusion_reason(&argv)
                .is_some()
        {
            detail.category = GrantCategory::RequiresIndividual;
            detail.note = Some("high-risk command, individual approval required".to_owned());
        }

        let risk = self.risk.score(&normalized);
        detail.risk_score = risk.score;
        if risk.score >= GRANT_RISK_GATE && detail.category == GrantCategory::Grantable {
            detail.category = GrantCategory::RequiresIndividual;
            detail.note = Some(format!("risk score {} >= {GRANT_RISK_GATE}", risk.score));
        }

        detail
    }

    /// Create a pending grant session from a command bundle.
    ///
    /// # Errors
    ///
    /// Rejects empty or oversized bundles, invalid patterns, and bundles
    /// containing any blocked or critical-compliance command.
    pub async fn request(
        &self,
        commands: &[String],
        reason: &str,
        source: &str,
        account_id: &str,
        ttl_minutes: Option<u64>,
        allow_repeat: bool,
    ) -> ApprovalResult<GrantSession> {
        if commands.is_empty() {
            return Err(ApprovalError::InvalidRequest("commands must not be empty".to_owned()));
        }
        if commands.len() > self.limits.max_commands {
            return Err(ApprovalError::InvalidRequest(format!(
                "bundle has {} commands (limit {})",
                commands.len(),
                self.limits.max_commands
            )));
        }
        if reason.trim().is_empty() {
            return Err(ApprovalError::InvalidRequest("reason must not be empty".to_owned()));
        }
        if source.trim().is_empty() {
            return Err(ApprovalError::InvalidRequest("source must not be empty".to_owned()));
        }
        let ttl_minutes = ttl_minutes
            .unwrap_or(self.limits.default_ttl_minutes)
            .clamp(1, self.limits.ttl_max_minutes);

        let mut details = Vec::with_capacity(commands.len());
        for raw in commands {
            // Pattern entries must compile under the safety guards before
            // anything else looks at them.
            if GrantPattern::is_pattern(raw) {
                GrantPattern::compile(&normalize(raw))?;
            }
            details.push(self.precheck(raw));
        }

        let blocked: Vec<&GrantCommandDetail> = details
            .iter()
            .filter(|d| d.category == GrantCategory::Blocked)
            .collect();
        if !blocked.is_empty() {
            let reasons: Vec<String> = blocked
                .iter()
                .map(|d| {
                    format!(
                        "'{}': {}",
                        d.normalized,
                        d.note.as_deref().unwrap_or("blocked")
                    )
                })
                .collect();
            return Err(ApprovalError::GrantRejected(reasons.join("; ")));
        }

        let now = Timestamp::now();
        let session = GrantSession {
            grant_id: GrantId::new(),
            source: source.to_owned(),
            account_id: account_id.to_owned(),
            reason: reason.to_owned(),
            status: GrantStatus::Pending,
            commands_detail: details,
            granted: Vec::new(),
            used: BTreeMap::new(),
            executions_used: 0,
            max_executions: self.limits.max_executions,
            allow_repeat,
            ttl_minutes,
            created_at: now,
            approved_at: None,
            expires_at: now.plus_seconds(self.limits.approval_timeout_seconds),
            approved_by: None,
        };
        self.store.put_grant(session.clone()).await?;
        tracing::info!(grant_id = %session.grant_id, source, "grant bundle requested");
        Ok(session)
    }

    /// Approve a pending grant. TTL starts now.
    ///
    /// Returns `None` when the grant is missing or no longer pending.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn approve(
        &self,
        grant_id: &GrantId,
        approver: &str,
        mode: GrantApprovalMode,
    ) -> StoreResult<Option<GrantSession>> {
        let Some(mut session) = self.store.get_grant(grant_id).await? else {
            return Ok(None);
        };
        if session.status != GrantStatus::Pending {
            return Ok(None);
        }

        session.granted = session
            .commands_detail
            .iter()
            .filter(|d| match mode {
                GrantApprovalMode::All => d.category != GrantCategory::Blocked,
                GrantApprovalMode::SafeOnly => d.category == GrantCategory::Grantable,
            })
            .map(|d| d.normalized.clone())
            .collect();
        let now = Timestamp::now();
        session.status = GrantStatus::Approved;
        session.approved_at = Some(now);
        session.approved_by = Some(approver.to_owned());
        session.expires_at = now.plus_seconds(session.ttl_minutes * 60);

        if self.store.decide_grant(session.clone()).await? {
            tracing::info!(
                grant_id = %session.grant_id,
                granted = session.granted.len(),
                "grant approved"
            );
            Ok(Some(session))
        } else {
            Ok(None)
        }
    }

    /// Deny a pending grant. Returns false when it was not pending.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn deny(&self, grant_id: &GrantId, approver: &str) -> StoreResult<bool> {
        let Some(mut session) = self.store.get_grant(grant_id).await? else {
            return Ok(false);
        };
        if session.status != GrantStatus::Pending {
            return Ok(false);
        }
        session.status = GrantStatus::Denied;
        session.approved_by = Some(approver.to_owned());
        self.store.decide_grant(session).await
    }

    /// Revoke a grant in any state.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn revoke(&self, grant_id: &GrantId) -> StoreResult<bool> {
        self.store.revoke_grant(grant_id).await
    }

    /// Authorize one execution from the bundle.
    ///
    /// Normalizes the command, verifies membership against the authorized
    /// set (exact or pattern), and atomically consumes the budget. On
    /// success the returned snapshot reflects the consumption.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::GrantNotFound`] for unknown grants or a source
    /// mismatch; [`ApprovalError::GrantRefused`] when the session cannot
    /// authorize this execution.
    pub async fn authorize(
        &self,
        grant_id: &GrantId,
        raw_command: &str,
        source: &str,
        account_id: &str,
    ) -> ApprovalResult<(String, GrantSession)> {
        let Some(session) = self.store.get_grant(grant_id).await? else {
            return Err(ApprovalError::GrantNotFound);
        };
        if session.source != source || session.account_id != account_id {
            // A wrong source learns nothing about the grant's existence.
            return Err(ApprovalError::GrantNotFound);
        }
        let now = Timestamp::now();
        if session.status != GrantStatus::Approved {
            return Err(ApprovalError::GrantRefused(format!(
                "grant is {:?}",
                session.status
            )));
        }
        if session.expires_at.is_past(now) {
            return Err(ApprovalError::GrantRefused("grant expired".to_owned()));
        }

        let normalized = normalize(raw_command);
        let matched = session
            .granted
            .iter()
            .any(|entry| entry_matches(entry, &normalized));
        if !matched {
            return Err(ApprovalError::GrantRefused(
                "command is not in the granted set".to_owned(),
            ));
        }

        let dangerous = split_argv(&normalized)
            .map(|argv| self.classifier.classify(&argv).is_dangerous())
            .unwrap_or(true);

        match self
            .store
            .consume_grant(grant_id, &normalized, dangerous)
            .await?
        {
            ConsumeOutcome::Consumed(snapshot) => Ok((normalized, *snapshot)),
            ConsumeOutcome::Denied(reason) => Err(ApprovalError::GrantRefused(reason)),
        }
    }

    /// Status projection, gated on source match.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn status(
        &self,
        grant_id: &GrantId,
        source: &str,
    ) -> StoreResult<Option<GrantStatusView>> {
        let Some(session) = self.store.get_grant(grant_id).await? else {
            return Ok(None);
        };
        if session.source != source {
            return Ok(None);
        }
        let now = Timestamp::now();
        let mut status = session.status;
        if status == GrantStatus::Approved && session.expires_at.is_past(now) {
            status = GrantStatus::Expired;
        }
        Ok(Some(GrantStatusView {
            grant_id: session.grant_id.clone(),
            status,
            granted_count: session.granted.len(),
            used_count: session.used.len(),
            executions_used: session.executions_used,
            max_executions: session.max_executions,
            remaining_seconds: session.remaining_seconds(now),
            allow_repeat: session.allow_repeat,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use bouncer_command::ClassifierRules;

    fn manager() -> GrantManager<MemoryStore> {
        GrantManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Classifier::new(ClassifierRules::default())),
            Arc::new(ComplianceChecker::default()),
            Arc::new(RiskScorer::default()),
            GrantLimits::default(),
        )
    }

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    // -----------------------------------------------------------------------
    // Request-time pre-check
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_bundle_with_blocked_command_rejected() {
        let mgr = manager();
        let err = mgr
            .request(
                &cmds(&[
                    "aws s3 ls s3://x",
                    "aws ec2 describe-instances",
                    "aws iam delete-user --user-name y",
                ]),
                "cleanup",
                "bot-A",
                "111111111111",
                Some(30),
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::GrantRejected(_)));
    }

    #[tokio::test]
    async fn test_dangerous_command_lands_in_requires_individual() {
        let mgr = manager();
        let session = mgr
            .request(
                &cmds(&["aws s3 ls s3://x", "aws dynamodb delete-table --table-name t"]),
                "cleanup",
                "bot-A",
                "111111111111",
                Some(30),
                false,
            )
            .await
            .unwrap();
        assert_eq!(session.commands_detail[0].category, GrantCategory::Grantable);
        assert_eq!(
            session.commands_detail[1].category,
            GrantCategory::RequiresIndividual
        );
        assert_eq!(session.status, GrantStatus::Pending);
    }

    #[tokio::test]
    async fn test_bundle_limits() {
        let mgr = manager();
        assert!(mgr
            .request(&[], "r", "s", "a", None, false)
            .await
            .is_err());
        let too_many: Vec<String> = (0..21).map(|i| format!("aws s3 ls s3://b{i}")).collect();
        assert!(mgr
            .request(&too_many, "r", "s", "a", None, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ttl_clamped_to_max() {
        let mgr = manager();
        let session = mgr
            .request(&cmds(&["aws s3 ls"]), "r", "s", "a", Some(240), false)
            .await
            .unwrap();
        assert_eq!(session.ttl_minutes, 60);
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected_at_request() {
        let mgr = manager();
        let err = mgr
            .request(
                &cmds(&["aws s3 ls s3://b/***"]),
                "r",
                "s",
                "a",
                None,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Pattern(_)));
    }

    // -----------------------------------------------------------------------
    // Approve / execute
    // -----------------------------------------------------------------------

    async fn approved_grant(mgr: &GrantManager<MemoryStore>, allow_repeat: bool) -> GrantSession {
        let session = mgr
            .request(
                &cmds(&["aws s3 ls s3://x", "aws ec2 describe-instances"]),
                "listing",
                "bot-A",
                "111111111111",
                Some(30),
                allow_repeat,
            )
            .await
            .unwrap();
        mgr.approve(&session.grant_id, "approver-1", GrantApprovalMode::All)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_approve_all_then_execute() {
        let mgr = manager();
        let grant = approved_grant(&mgr, true).await;
        assert_eq!(grant.granted.len(), 2);

        let (normalized, snapshot) = mgr
            .authorize(&grant.grant_id, "aws s3 ls s3://x", "bot-A", "111111111111")
            .await
            .unwrap();
        assert_eq!(normalized, "aws s3 ls s3://x");
        assert_eq!(snapshot.executions_used, 1);
    }

    #[tokio::test]
    async fn test_not_in_grant_refused() {
        let mgr = manager();
        let grant = approved_grant(&mgr, true).await;
        let err = mgr
            .authorize(&grant.grant_id, "aws s3 cp a s3://b/", "bot-A", "111111111111")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::GrantRefused(_)));
    }

    #[tokio::test]
    async fn test_source_mismatch_reads_as_not_found() {
        let mgr = manager();
        let grant = approved_grant(&mgr, true).await;
        let err = mgr
            .authorize(&grant.grant_id, "aws s3 ls s3://x", "other-bot", "111111111111")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::GrantNotFound));
    }

    #[tokio::test]
    async fn test_single_use_entry_consumed_once() {
        let mgr = manager();
        let grant = approved_grant(&mgr, false).await;
        assert!(mgr
            .authorize(&grant.grant_id, "aws s3 ls s3://x", "bot-A", "111111111111")
            .await
            .is_ok());
        let err = mgr
            .authorize(&grant.grant_id, "aws s3 ls s3://x", "bot-A", "111111111111")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::GrantRefused(_)));
    }

    #[tokio::test]
    async fn test_approve_safe_only_excludes_dangerous() {
        let mgr = manager();
        let session = mgr
            .request(
                &cmds(&["aws s3 ls s3://x", "aws dynamodb delete-table --table-name t"]),
                "cleanup",
                "bot-A",
                "111111111111",
                Some(30),
                false,
            )
            .await
            .unwrap();
        let approved = mgr
            .approve(&session.grant_id, "approver-1", GrantApprovalMode::SafeOnly)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.granted, vec!["aws s3 ls s3://x".to_owned()]);
    }

    #[tokio::test]
    async fn test_deny_then_approve_is_noop() {
        let mgr = manager();
        let session = mgr
            .request(&cmds(&["aws s3 ls"]), "r", "bot-A", "a", None, false)
            .await
            .unwrap();
        assert!(mgr.deny(&session.grant_id, "approver-1").await.unwrap());
        assert!(
            mgr.approve(&session.grant_id, "approver-1", GrantApprovalMode::All)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_pattern_entry_authorizes_match() {
        let mgr = manager();
        let session = mgr
            .request(
                &cmds(&["aws s3 ls s3://uploads/{date}/*"]),
                "daily check",
                "bot-A",
                "111111111111",
                Some(30),
                true,
            )
            .await
            .unwrap();
        let grant = mgr
            .approve(&session.grant_id, "approver-1", GrantApprovalMode::All)
            .await
            .unwrap()
            .unwrap();
        assert!(mgr
            .authorize(
                &grant.grant_id,
                "aws s3 ls s3://uploads/2025-06-01/report.html",
                "bot-A",
                "111111111111"
            )
            .await
            .is_ok());
        assert!(mgr
            .authorize(
                &grant.grant_id,
                "aws s3 ls s3://uploads/june/report.html",
                "bot-A",
                "111111111111"
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_status_view_source_gated() {
        let mgr = manager();
        let grant = approved_grant(&mgr, true).await;
        let view = mgr.status(&grant.grant_id, "bot-A").await.unwrap().unwrap();
        assert_eq!(view.status, GrantStatus::Approved);
        assert_eq!(view.granted_count, 2);
        assert!(mgr.status(&grant.grant_id, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoked_grant_refuses() {
        let mgr = manager();
        let grant = approved_grant(&mgr, true).await;
        assert!(mgr.revoke(&grant.grant_id).await.unwrap());
        let err = mgr
            .authorize(&grant.grant_id, "aws s3 ls s3://x", "bot-A", "111111111111")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::GrantRefused(_)));
    }
}
