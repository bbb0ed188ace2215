//! The webhook dispatcher.
//!
//! Interprets approver callbacks, applies the one legal transition, runs
//! the side effect (execute, register account, start deploy, promote
//! uploads, decide grants), edits the bound message once, and answers the
//! callback exactly once on every path.
//!
//! The store's conditional update is the arbiter: whichever actor moves the
//! record out of `pending` first wins; everyone else sees "already
//! handled" and the original message is left intact.

use std::collections::BTreeSet;
use std::sync::Arc;

use bouncer_approval::{
    ApprovalRequest, GrantApprovalMode, GrantManager, RecordPatch, RequestPayload, Store,
    TransitionOutcome, TrustBudgets, TrustManager, TrustOutcome, TrustSession,
};
use bouncer_audit::{AuditEntry, AuditLog};
use bouncer_command::split_argv;
use bouncer_config::TrustSection;
use bouncer_core::{
    DecisionType, GatewayResult, GrantId, RequestId, RequestStatus, Timestamp, TrustId,
};
use bouncer_policy::ComplianceChecker;

use crate::accounts::{Account, AccountStore};
use crate::callback::{CallbackEvent, CallbackKind, CallbackToken};
use crate::executor::{ExecReport, ExecutionEngine};
use crate::notify;
use crate::traits::{Deployer, Notifier, ObjectStore};

/// Auto-drain batch bound.
const DRAIN_BATCH: usize = 20;

/// The dispatcher and its seams.
pub struct WebhookDispatcher<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    engine: Arc<ExecutionEngine<S>>,
    trust: Arc<TrustManager<S>>,
    grant: Arc<GrantManager<S>>,
    accounts: Arc<dyn AccountStore>,
    object_store: Arc<dyn ObjectStore>,
    deployer: Option<Arc<dyn Deployer>>,
    compliance: Arc<ComplianceChecker>,
    audit: Arc<AuditLog>,
    approvers: BTreeSet<String>,
    trust_config: TrustSection,
}

impl<S: Store> WebhookDispatcher<S> {
    /// Wire a dispatcher.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        engine: Arc<ExecutionEngine<S>>,
        trust: Arc<TrustManager<S>>,
        grant: Arc<GrantManager<S>>,
        accounts: Arc<dyn AccountStore>,
        object_store: Arc<dyn ObjectStore>,
        deployer: Option<Arc<dyn Deployer>>,
        compliance: Arc<ComplianceChecker>,
        audit: Arc<AuditLog>,
        approvers: BTreeSet<String>,
        trust_config: TrustSection,
    ) -> Self {
        Self {
            store,
            notifier,
            engine,
            trust,
            grant,
            accounts,
            object_store,
            deployer,
            compliance,
            audit,
            approvers,
            trust_config,
        }
    }

    /// Handle one callback event. Exactly one `answer_callback` fires per
    /// invocation, whatever the path.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures surface; decision outcomes are carried
    /// by the callback answer and message edits.
    pub async fn dispatch(&self, event: CallbackEvent) -> GatewayResult<()> {
        let Some(token) = CallbackToken::parse(&event.token) else {
            tracing::warn!(token = %event.token, "unparseable callback token");
            self.answer(&event.callback_id, "invalid callback").await;
            return Ok(());
        };

        if !self.approvers.contains(&event.approver_id) {
            tracing::warn!(approver = %event.approver_id, "callback from non-whitelisted identity");
            self.answer(&event.callback_id, "not authorized").await;
            return Ok(());
        }

        match token.kind {
            CallbackKind::TrustRevoke => {
                let revoked = self
                    .trust
                    .revoke(&TrustId::from(token.target.as_str()))
                    .await
                    .unwrap_or(false);
                let text = if revoked { "🛑 trust ended" } else { "trust session not found" };
                self.answer(&event.callback_id, text).await;
            },
            CallbackKind::GrantRevoke => {
                let revoked = self
                    .grant
                    .revoke(&GrantId::from(token.target.as_str()))
                    .await
                    .unwrap_or(false);
                let text = if revoked { "🛑 grant revoked" } else { "grant not found" };
                self.answer(&event.callback_id, text).await;
            },
            _ => self.dispatch_record(token, &event).await,
        }
        Ok(())
    }

    async fn dispatch_record(&self, token: CallbackToken, event: &CallbackEvent) {
        let request_id = RequestId::from(token.target.as_str());
        let record = match self.store.get(&request_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.answer(&event.callback_id, "unknown request").await;
                return;
            },
            Err(e) => {
                tracing::warn!(error = %e, "record lookup failed");
                self.answer(&event.callback_id, "store unavailable, try again").await;
                return;
            },
        };

        // A record that already left pending is never edited again; later
        // callbacks only get a toast.
        if record.status != RequestStatus::Pending {
            self.answer(&event.callback_id, "already handled").await;
            return;
        }

        let now = Timestamp::now();
        if record.is_expired(now) {
            let patch = RecordPatch::decision(DecisionType::Expired, None);
            match self
                .store
                .transition(&request_id, RequestStatus::Pending, RequestStatus::Expired, patch)
                .await
            {
                Ok(TransitionOutcome::Applied(updated)) => {
                    self.edit_record_message(&updated, None).await;
                    self.audit_resolution(&updated, DecisionType::Expired, now);
                },
                Ok(TransitionOutcome::Conflict) | Err(_) => {},
            }
            self.answer(&event.callback_id, "request expired").await;
            return;
        }

        if token.kind.is_deny() {
            let patch = RecordPatch::decision(
                DecisionType::Denied,
                Some(event.approver_id.clone()),
            );
            match self
                .store
                .transition(&request_id, RequestStatus::Pending, RequestStatus::Denied, patch)
                .await
            {
                Ok(TransitionOutcome::Applied(updated)) => {
                    self.edit_record_message(&updated, None).await;
                    self.audit_resolution(&updated, DecisionType::Denied, now);
                    self.answer(&event.callback_id, "❌ denied").await;
                },
                Ok(TransitionOutcome::Conflict) => {
                    self.answer(&event.callback_id, "already handled").await;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "deny transition failed");
                    self.answer(&event.callback_id, "store unavailable, try again").await;
                },
            }
            return;
        }

        // Approve-flavored kinds: win the transition first, act second.
        let patch = RecordPatch::decision(
            DecisionType::Approved,
            Some(event.approver_id.clone()),
        );
        let approved = match self
            .store
            .transition(&request_id, RequestStatus::Pending, RequestStatus::Approved, patch)
            .await
        {
            Ok(TransitionOutcome::Applied(record)) => record,
            Ok(TransitionOutcome::Conflict) => {
                self.answer(&event.callback_id, "already handled").await;
                return;
            },
            Err(e) => {
                tracing::warn!(error = %e, "approve transition failed");
                self.answer(&event.callback_id, "store unavailable, try again").await;
                return;
            },
        };

        match token.kind {
            CallbackKind::CmdApprove
            | CallbackKind::DangerousConfirm
            | CallbackKind::CmdApproveTrust => {
                self.resolve_command(*approved, token.kind, event, now).await;
            },
            CallbackKind::AccountAddApprove | CallbackKind::AccountRemoveApprove => {
                self.resolve_account_change(*approved, event, now).await;
            },
            CallbackKind::DeployApprove => {
                self.resolve_deploy(*approved, event, now).await;
            },
            CallbackKind::UploadApprove
            | CallbackKind::UploadApproveTrust
            | CallbackKind::UploadBatchApprove
            | CallbackKind::UploadBatchApproveTrust => {
                self.resolve_upload(*approved, token.kind, event, now).await;
            },
            CallbackKind::GrantApproveAll | CallbackKind::GrantApproveSafe => {
                self.resolve_grant_decision(*approved, token.kind, event, now).await;
            },
            // Deny and revoke kinds were handled above.
            _ => {
                self.answer(&event.callback_id, "unsupported callback").await;
            },
        }
    }

    async fn resolve_command(
        &self,
        record: ApprovalRequest,
        kind: CallbackKind,
        event: &CallbackEvent,
        now: Timestamp,
    ) {
        let RequestPayload::Execute { command, assume_role } = record.payload.clone() else {
            self.finish_execution_failure(&record, "record carries no command", event).await;
            return;
        };
        let argv = match split_argv(&command) {
            Ok(argv) => argv,
            Err(e) => {
                self.finish_execution_failure(&record, &format!("stored command unparseable: {e}"), event)
                    .await;
                return;
            },
        };

        let exec = self
            .engine
            .run(&record.request_id, argv, assume_role.as_deref())
            .await;
        let updated = self.write_exec_result(&record, &exec).await;
        if let Some(updated) = &updated {
            self.edit_record_message(updated, exec.paged.notice().as_deref()).await;
            self.audit_resolution(updated, DecisionType::Approved, now);
        }

        if kind.opens_trust() {
            self.open_trust_and_drain(&record, event, false).await;
            self.answer(&event.callback_id, "✅ executed, 🔓 trust opened").await;
        } else if exec.is_ok() {
            self.answer(&event.callback_id, "✅ executed").await;
        } else {
            self.answer(&event.callback_id, "❌ execution failed").await;
        }
    }

    async fn resolve_account_change(
        &self,
        record: ApprovalRequest,
        event: &CallbackEvent,
        now: Timestamp,
    ) {
        let outcome = match &record.payload {
            RequestPayload::AccountAdd { account_id, name, role_arn } => {
                let account = Account {
                    account_id: account_id.clone(),
                    name: name.clone(),
                    role_arn: role_arn.clone(),
                    upload_bucket: None,
                    sensitivity: None,
                    enabled: true,
                    created_by: event.approver_id.clone(),
                    created_at: now,
                };
                self.accounts
                    .put(account)
                    .await
                    .map(|()| format!("account {account_id} registered"))
                    .map_err(|e| e.to_string())
            },
            RequestPayload::AccountRemove { account_id, .. } => {
                match self.accounts.remove(account_id).await {
                    Ok(true) => Ok(format!("account {account_id} removed")),
                    Ok(false) => Err(format!("account {account_id} not found")),
                    Err(e) => Err(e.to_string()),
                }
            },
            _ => Err("record is not an account operation".to_owned()),
        };

        match outcome {
            Ok(result) => {
                let updated = self.write_plain_result(&record, &result, 0).await;
                if let Some(updated) = &updated {
                    self.edit_record_message(updated, None).await;
                    self.audit_resolution(updated, DecisionType::Approved, now);
                }
                self.answer(&event.callback_id, "✅ done").await;
            },
            Err(error) => {
                self.finish_execution_failure(&record, &error, event).await;
            },
        }
    }

    async fn resolve_deploy(
        &self,
        record: ApprovalRequest,
        event: &CallbackEvent,
        now: Timestamp,
    ) {
        let RequestPayload::Deploy { project_id, branch, .. } = record.payload.clone() else {
            self.finish_execution_failure(&record, "record is not a deploy", event).await;
            return;
        };
        let Some(deployer) = &self.deployer else {
            self.finish_execution_failure(&record, "deployer is not configured", event).await;
            return;
        };
        match deployer
            .start(&project_id, &branch, &event.approver_id, &record.reason)
            .await
        {
            Ok(deploy_id) => {
                let result = format!("deploy started: {deploy_id}");
                let updated = self.write_plain_result(&record, &result, 0).await;
                if let Some(updated) = &updated {
                    self.edit_record_message(updated, None).await;
                    self.audit_resolution(updated, DecisionType::Approved, now);
                }
                self.answer(&event.callback_id, "🚀 deploy started").await;
            },
            Err(e) => {
                self.finish_execution_failure(&record, &format!("deploy start failed: {e}"), event)
                    .await;
            },
        }
    }

    async fn resolve_upload(
        &self,
        record: ApprovalRequest,
        kind: CallbackKind,
        event: &CallbackEvent,
        now: Timestamp,
    ) {
        let promotions: Vec<(String, String)> = match &record.payload {
            RequestPayload::Upload { file, bucket } => vec![(
                bucket.clone(),
                file.s3_key.clone().unwrap_or_else(|| file.filename.clone()),
            )],
            RequestPayload::UploadBatch { files, bucket, .. } => files
                .iter()
                .map(|f| {
                    (
                        bucket.clone(),
                        f.s3_key.clone().unwrap_or_else(|| f.filename.clone()),
                    )
                })
                .collect(),
            _ => {
                self.finish_execution_failure(&record, "record is not an upload", event).await;
                return;
            },
        };

        let mut lines = Vec::new();
        let mut failed = false;
        for (bucket, key) in promotions {
            match self.object_store.promote(&bucket, &key).await {
                Ok(uri) => lines.push(uri),
                Err(e) => {
                    failed = true;
                    lines.push(format!("{key}: {e}"));
                },
            }
        }
        let result = lines.join("\n");
        let exit_code = i32::from(failed);
        let updated = self.write_plain_result(&record, &result, exit_code).await;
        if let Some(updated) = &updated {
            self.edit_record_message(updated, None).await;
            self.audit_resolution(updated, DecisionType::Approved, now);
        }

        if kind.opens_trust() {
            self.open_trust_and_drain(&record, event, true).await;
            self.answer(&event.callback_id, "✅ uploaded, 🔓 trust opened").await;
        } else if failed {
            self.answer(&event.callback_id, "❌ upload failed").await;
        } else {
            self.answer(&event.callback_id, "✅ uploaded").await;
        }
    }

    async fn resolve_grant_decision(
        &self,
        record: ApprovalRequest,
        kind: CallbackKind,
        event: &CallbackEvent,
        now: Timestamp,
    ) {
        let RequestPayload::Grant { grant_id } = record.payload.clone() else {
            self.finish_execution_failure(&record, "record is not a grant", event).await;
            return;
        };
        let mode = if kind == CallbackKind::GrantApproveAll {
            GrantApprovalMode::All
        } else {
            GrantApprovalMode::SafeOnly
        };
        match self.grant.approve(&grant_id, &event.approver_id, mode).await {
            Ok(Some(session)) => {
                let result = format!(
                    "granted {} entries for {} minutes",
                    session.granted.len(),
                    session.ttl_minutes
                );
                let updated = self.write_plain_result(&record, &result, 0).await;
                if let Some(updated) = &updated {
                    self.edit_record_message(updated, None).await;
                    self.audit_resolution(updated, DecisionType::Approved, now);
                }
                self.answer(&event.callback_id, "✅ grant approved").await;
            },
            Ok(None) => {
                self.finish_execution_failure(&record, "grant is no longer pending", event).await;
            },
            Err(e) => {
                self.finish_execution_failure(&record, &format!("grant approval failed: {e}"), event)
                    .await;
            },
        }
    }

    /// Open a trust session for the record's scope and drain matching
    /// pending records.
    async fn open_trust_and_drain(
        &self,
        record: &ApprovalRequest,
        event: &CallbackEvent,
        enable_uploads: bool,
    ) {
        let Some(scope) = record.trust_scope.clone().filter(|s| !s.is_empty()) else {
            tracing::warn!(request_id = %record.request_id, "approve-with-trust on a record without trust_scope");
            return;
        };
        let budgets = TrustBudgets {
            ttl_seconds: self.trust_config.ttl_minutes * 60,
            commands_max: self.trust_config.max_commands,
            uploads_max: if enable_uploads { self.trust_config.max_uploads } else { 0 },
            bytes_max: self.trust_config.max_bytes,
            per_upload_bytes_max: self.trust_config.per_upload_bytes,
        };
        let session = match self
            .trust
            .begin(&scope, &record.account_id, &record.source, &event.approver_id, budgets)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open trust session");
                return;
            },
        };
        self.drain_on_trust(&session).await;
    }

    /// One-shot drain after a trust session opens (bounded batch; each
    /// record individually atomic).
    async fn drain_on_trust(&self, session: &TrustSession) {
        let pending = match self
            .store
            .list_pending_for_trust(&session.trust_scope, &session.account_id, DRAIN_BATCH)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "drain scan failed");
                return;
            },
        };

        for record in pending {
            let Some(command) = record.command().map(str::to_owned) else {
                continue;
            };

            // Compliance re-runs at drain time; findings are honored as if
            // the command were freshly admitted.
            let report = self.compliance.check_command(&command);
            if let Some(critical) = report.critical() {
                let patch = RecordPatch {
                    result: Some(format!("rejected at drain: {}", critical.reason)),
                    decision_type: Some(DecisionType::ComplianceRejected),
                    ..RecordPatch::default()
                };
                if let Ok(TransitionOutcome::Applied(updated)) = self
                    .store
                    .transition(&record.request_id, RequestStatus::Pending, RequestStatus::Denied, patch)
                    .await
                {
                    self.edit_record_message(&updated, None).await;
                    self.audit_resolution(&updated, DecisionType::ComplianceRejected, Timestamp::now());
                }
                continue;
            }
            if report.forces_manual() {
                continue;
            }
            let Ok(argv) = split_argv(&command) else {
                continue;
            };

            let outcome = self
                .trust
                .try_consume_command(&session.trust_scope, &session.account_id, &argv)
                .await;
            let TrustOutcome::Approved(_) = outcome else {
                continue;
            };

            let patch = RecordPatch::decision(
                DecisionType::TrustAutoApproved,
                Some(session.approved_by.clone()),
            );
            let approved = match self
                .store
                .transition(&record.request_id, RequestStatus::Pending, RequestStatus::Approved, patch)
                .await
            {
                Ok(TransitionOutcome::Applied(approved)) => approved,
                Ok(TransitionOutcome::Conflict) => {
                    tracing::debug!(request_id = %record.request_id, "drain lost the transition race");
                    continue;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "drain transition failed");
                    continue;
                },
            };

            let assume_role = match &approved.payload {
                RequestPayload::Execute { assume_role, .. } => assume_role.clone(),
                _ => None,
            };
            let exec = self
                .engine
                .run(&approved.request_id, argv, assume_role.as_deref())
                .await;
            let updated = self.write_exec_result(&approved, &exec).await;
            if let Some(updated) = &updated {
                self.edit_record_message(updated, exec.paged.notice().as_deref()).await;
                self.audit_resolution(updated, DecisionType::TrustAutoApproved, Timestamp::now());
            }
        }
    }

    /// Write an execution result onto an approved record.
    async fn write_exec_result(
        &self,
        record: &ApprovalRequest,
        exec: &ExecReport,
    ) -> Option<ApprovalRequest> {
        let to = if exec.is_ok() {
            RequestStatus::ExecutedOk
        } else {
            RequestStatus::ExecutedError
        };
        let patch = RecordPatch {
            result: Some(exec.truncated_result.clone()),
            exit_code: Some(exec.exit_code),
            execution_time_ms: Some(exec.duration_ms),
            ..RecordPatch::default()
        };
        match self
            .store
            .transition(&record.request_id, RequestStatus::Approved, to, patch)
            .await
        {
            Ok(TransitionOutcome::Applied(updated)) => Some(*updated),
            Ok(TransitionOutcome::Conflict) => {
                tracing::warn!(request_id = %record.request_id, "result write conflicted");
                None
            },
            Err(e) => {
                tracing::warn!(error = %e, "result write failed");
                None
            },
        }
    }

    /// Write a textual outcome (account/deploy/upload/grant paths).
    async fn write_plain_result(
        &self,
        record: &ApprovalRequest,
        result: &str,
        exit_code: i32,
    ) -> Option<ApprovalRequest> {
        let to = if exit_code == 0 {
            RequestStatus::ExecutedOk
        } else {
            RequestStatus::ExecutedError
        };
        let patch = RecordPatch {
            result: Some(result.to_owned()),
            exit_code: Some(exit_code),
            ..RecordPatch::default()
        };
        match self
            .store
            .transition(&record.request_id, RequestStatus::Approved, to, patch)
            .await
        {
            Ok(TransitionOutcome::Applied(updated)) => Some(*updated),
            Ok(TransitionOutcome::Conflict) => None,
            Err(e) => {
                tracing::warn!(error = %e, "result write failed");
                None
            },
        }
    }

    /// Record a side-effect failure on an approved record and answer.
    async fn finish_execution_failure(
        &self,
        record: &ApprovalRequest,
        error: &str,
        event: &CallbackEvent,
    ) {
        tracing::warn!(request_id = %record.request_id, error, "approved action failed");
        let updated = self.write_plain_result(record, error, 1).await;
        if let Some(updated) = &updated {
            self.edit_record_message(updated, None).await;
            self.audit_resolution(updated, DecisionType::Approved, Timestamp::now());
        }
        self.answer(&event.callback_id, "❌ action failed").await;
    }

    async fn edit_record_message(&self, record: &ApprovalRequest, notice: Option<&str>) {
        let Some(message_id) = &record.message_id else {
            return;
        };
        let message = notify::resolution_message(record, notice);
        if let Err(e) = self.notifier.edit(message_id, &message).await {
            tracing::warn!(error = %e, "message edit failed");
        }
    }

    fn audit_resolution(&self, record: &ApprovalRequest, decision: DecisionType, now: Timestamp) {
        let latency_ms = u64::try_from((now - record.created_at).num_milliseconds()).unwrap_or(0);
        self.audit.record(&AuditEntry::new(
            record.request_id.clone(),
            record.kind,
            decision,
            record.source.clone(),
            record.trust_scope.clone(),
            record.account_id.clone(),
            record.risk_score,
            record
                .decision_type
                .map(|d| vec![d.to_string()])
                .unwrap_or_default(),
            latency_ms,
        ));
    }

    async fn answer(&self, callback_id: &str, text: &str) {
        if let Err(e) = self.notifier.answer_callback(callback_id, text).await {
            tracing::warn!(error = %e, "answer_callback failed");
        }
    }
}
