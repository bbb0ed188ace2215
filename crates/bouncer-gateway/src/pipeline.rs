//! The admission pipeline.
//!
//! One entry point, [`AdmissionPipeline::admit`], applies the stages in a
//! fixed order: parse, normalize, compliance (critical short-circuit),
//! blocked, safelist, rate limit, trust, grant, risk score, then manual.
//! The first terminal stage wins. A command is never executed without
//! having been classified, and no auto-approve path survives a HIGH
//! compliance finding.

use std::sync::Arc;

use bouncer_approval::{
    ApprovalRequest, GrantManager, RequestPayload, Store, TrustManager, TrustOutcome, TrustSession,
};
use bouncer_audit::{AuditEntry, AuditLog};
use bouncer_command::{Classification, Classifier, normalize, parse_command};
use bouncer_core::{
    DecisionType, GatewayError, GatewayResult, GrantId, PageId, RequestId, RequestStatus,
    Timestamp,
};
use bouncer_policy::{ComplianceChecker, ComplianceReport, RiskScorer};
use bouncer_config::ApprovalSection;

use crate::accounts::{AccountStore, ResolvedAccount, resolve_account};
use crate::executor::{ExecReport, ExecutionEngine};
use crate::notify;
use crate::rate::RateLimiter;
use crate::traits::Notifier;

/// A command submission from the agent.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The raw command string.
    pub command: String,
    /// Caller-supplied justification.
    pub reason: String,
    /// Caller display identity (rate limiting, audit).
    pub source: String,
    /// Stable trust key; required for command submissions.
    pub trust_scope: String,
    /// Target account; `None` uses the configured default.
    pub account_id: Option<String>,
    /// Grant session to execute under, if any.
    pub grant_id: Option<GrantId>,
    /// Requested approval window in seconds (capped).
    pub timeout_seconds: Option<u64>,
    /// Caller idempotency key; replays return the original record.
    pub idempotency_key: Option<String>,
}

/// Execution result summary surfaced to the agent.
#[derive(Debug, Clone)]
pub struct ExecSummary {
    /// First page of the output.
    pub result: String,
    /// Exit code.
    pub exit_code: i32,
    /// Total page count.
    pub total_pages: u32,
    /// Token for page 2, when paged.
    pub next_page: Option<PageId>,
}

impl From<&ExecReport> for ExecSummary {
    fn from(report: &ExecReport) -> Self {
        Self {
            result: report.first_page.clone(),
            exit_code: report.exit_code,
            total_pages: report.paged.total_pages,
            next_page: report.paged.next_page.clone(),
        }
    }
}

/// What admission decided.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    /// Safelisted and executed immediately.
    AutoApproved {
        /// Record id.
        request_id: RequestId,
        /// Execution result.
        result: ExecSummary,
    },
    /// Executed under an active trust session.
    TrustAutoApproved {
        /// Record id.
        request_id: RequestId,
        /// Execution result.
        result: ExecSummary,
        /// Post-consumption session snapshot.
        commands_used: u32,
        /// Session command budget.
        commands_max: u32,
        /// Seconds left on the session.
        remaining_seconds: u64,
    },
    /// Executed under an approved grant session.
    GrantAutoApproved {
        /// Record id.
        request_id: RequestId,
        /// Execution result.
        result: ExecSummary,
        /// The grant that authorized it.
        grant_id: GrantId,
    },
    /// Persisted for human review.
    Pending {
        /// Record id for status polling.
        request_id: RequestId,
        /// Immutable display summary.
        display_summary: String,
        /// When the approval window closes.
        expires_at: Timestamp,
    },
    /// Idempotent replay of a submission that already resolved.
    Completed {
        /// Record id.
        request_id: RequestId,
        /// Where the record ended up.
        status: RequestStatus,
        /// Stored result, when the record executed.
        result: Option<ExecSummary>,
    },
}

impl AdmissionDecision {
    /// The record id behind this decision.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::AutoApproved { request_id, .. }
            | Self::TrustAutoApproved { request_id, .. }
            | Self::GrantAutoApproved { request_id, .. }
            | Self::Pending { request_id, .. }
            | Self::Completed { request_id, .. } => request_id,
        }
    }
}

/// The admission pipeline with its injected seams.
pub struct AdmissionPipeline<S> {
    store: Arc<S>,
    accounts: Arc<dyn AccountStore>,
    classifier: Arc<Classifier>,
    compliance: Arc<ComplianceChecker>,
    risk: Arc<RiskScorer>,
    trust: Arc<TrustManager<S>>,
    grant: Arc<GrantManager<S>>,
    rate: Arc<RateLimiter<S>>,
    engine: Arc<ExecutionEngine<S>>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<AuditLog>,
    approval: ApprovalSection,
    trust_ttl_minutes: u64,
    default_account_id: String,
}

impl<S: Store> AdmissionPipeline<S> {
    /// Wire a pipeline.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        accounts: Arc<dyn AccountStore>,
        classifier: Arc<Classifier>,
        compliance: Arc<ComplianceChecker>,
        risk: Arc<RiskScorer>,
        trust: Arc<TrustManager<S>>,
        grant: Arc<GrantManager<S>>,
        rate: Arc<RateLimiter<S>>,
        engine: Arc<ExecutionEngine<S>>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<AuditLog>,
        approval: ApprovalSection,
        trust_ttl_minutes: u64,
        default_account_id: String,
    ) -> Self {
        Self {
            store,
            accounts,
            classifier,
            compliance,
            risk,
            trust,
            grant,
            rate,
            engine,
            notifier,
            audit,
            approval,
            trust_ttl_minutes,
            default_account_id,
        }
    }

    /// Admit one command submission.
    ///
    /// # Errors
    ///
    /// Terminal rejections surface as [`GatewayError`] variants; every path
    /// is audited.
    pub async fn admit(&self, submission: Submission) -> GatewayResult<AdmissionDecision> {
        let started = std::time::Instant::now();
        let now = Timestamp::now();

        // Idempotent replay: a known key returns the original record.
        if let Some(key) = &submission.idempotency_key
            && let Ok(Some(request_id)) = self.store.find_by_idempotency_key(key).await
            && let Ok(Some(record)) = self.store.get(&request_id).await
        {
            tracing::debug!(%request_id, "idempotent replay");
            return Ok(replay_decision(&record));
        }

        // Parse + normalize. Rejections are audited via tracing only; no
        // record exists yet.
        let normalized = normalize(&submission.command);
        let argv = parse_command(&normalized, &self.classifier.rules().program)
            .map_err(|e| {
                tracing::info!(source = %submission.source, error = %e, "parse rejection");
                GatewayError::Parse(e.to_string())
            })?;

        if submission.trust_scope.trim().is_empty() {
            return Err(GatewayError::Parse(
                "trust_scope is required for command submissions".to_owned(),
            ));
        }

        let account = resolve_account(
            self.accounts.as_ref(),
            submission.account_id.as_deref(),
            &self.default_account_id,
        )
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;

        // Compliance runs once; CRITICAL short-circuits, HIGH disables every
        // auto path below.
        let report = self.compliance.check_command(&normalized);
        if let Some(critical) = report.critical() {
            self.audit_unpersisted(
                &submission,
                &account,
                DecisionType::ComplianceRejected,
                vec![critical.rule_id.clone(), critical.reason.clone()],
                started,
            );
            return Err(GatewayError::ComplianceRejected {
                rule_id: critical.rule_id.clone(),
                message: critical.reason.clone(),
            });
        }

        let classification = self.classifier.classify(&argv);
        if let Classification::Blocked { reason, suggestion } = &classification {
            return self
                .finish_blocked(&submission, &account, &normalized, reason, suggestion, started)
                .await;
        }

        // Safelist: execute immediately unless compliance forces manual.
        if classification == Classification::Safelist && !report.forces_manual() {
            return self
                .finish_safelist(&submission, &account, &normalized, &argv, &report, started)
                .await;
        }

        // Rate limiting guards every path that can reach a human or a
        // budget. Fail-closed.
        if let Err(e) = self.rate.check(&submission.source, now).await {
            self.audit_unpersisted(
                &submission,
                &account,
                DecisionType::RateLimited,
                vec![e.to_string()],
                started,
            );
            return Err(e);
        }

        // Trust: only plain-approval commands with clean compliance.
        if classification == Classification::Approval && !report.forces_manual() {
            let outcome = self
                .trust
                .try_consume_command(&submission.trust_scope, &account.account_id, &argv)
                .await;
            match outcome {
                TrustOutcome::Approved(session) => {
                    return self
                        .finish_trusted(
                            &submission,
                            &account,
                            &normalized,
                            &argv,
                            &report,
                            *session,
                            started,
                        )
                        .await;
                },
                TrustOutcome::FallThrough(reason) => {
                    tracing::debug!(reason, "trust fall-through");
                },
            }
        }

        // Grant: explicit handle, same compliance gate.
        if let Some(grant_id) = &submission.grant_id
            && !report.forces_manual()
        {
            match self
                .grant
                .authorize(
                    grant_id,
                    &normalized,
                    &submission.source,
                    &account.account_id,
                )
                .await
            {
                Ok((granted_cmd, _snapshot)) => {
                    return self
                        .finish_granted(
                            &submission,
                            &account,
                            &granted_cmd,
                            &argv,
                            &report,
                            grant_id.clone(),
                            started,
                        )
                        .await;
                },
                Err(e) => {
                    tracing::debug!(error = %e, "grant fall-through");
                },
            }
        }

        // Risk score is decision metadata from here on.
        let risk = self.risk.score(&normalized);

        self.finish_pending(
            submission,
            account,
            normalized,
            classification,
            report,
            risk,
            started,
        )
        .await
    }

    async fn finish_blocked(
        &self,
        submission: &Submission,
        account: &ResolvedAccount,
        normalized: &str,
        reason: &str,
        suggestion: &str,
        started: std::time::Instant,
    ) -> GatewayResult<AdmissionDecision> {
        let mut record = self.base_record(submission, account, normalized, RequestStatus::Blocked);
        record.decision_type = Some(DecisionType::Blocked);
        let request_id = record.request_id.clone();
        if let Err(e) = self.store.put_new(record).await {
            tracing::warn!(error = %e, "failed to persist blocked record");
        }

        let message = notify::blocked_message(normalized, reason, &submission.source);
        if let Err(e) = self.notifier.send_silent(&message).await {
            tracing::warn!(error = %e, "blocked notification failed");
        }

        self.audit.record(&AuditEntry::new(
            request_id,
            bouncer_core::ActionKind::Execute,
            DecisionType::Blocked,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            None,
            vec![reason.to_owned()],
            elapsed_ms(started),
        ));

        Err(GatewayError::Blocked {
            reason: reason.to_owned(),
            suggestion: suggestion.to_owned(),
        })
    }

    async fn finish_safelist(
        &self,
        submission: &Submission,
        account: &ResolvedAccount,
        normalized: &str,
        argv: &[String],
        report: &ComplianceReport,
        started: std::time::Instant,
    ) -> GatewayResult<AdmissionDecision> {
        let mut record =
            self.base_record(submission, account, normalized, RequestStatus::AutoApproved);
        record.decision_type = Some(DecisionType::AutoApproved);
        record.compliance_findings = report.findings.clone();

        let exec = self
            .engine
            .run(&record.request_id, argv.to_vec(), account.role_arn.as_deref())
            .await;
        apply_exec(&mut record, &exec);

        let request_id = record.request_id.clone();
        let message = notify::auto_approved_message(&record);
        if let Err(e) = self.store.put_new(record).await {
            tracing::warn!(error = %e, "failed to persist auto-approved record");
        }
        if let Err(e) = self.notifier.send_silent(&message).await {
            tracing::warn!(error = %e, "auto-approve notification failed");
        }

        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            bouncer_core::ActionKind::Execute,
            DecisionType::AutoApproved,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            None,
            vec!["safelist".to_owned()],
            elapsed_ms(started),
        ));

        Ok(AdmissionDecision::AutoApproved {
            request_id,
            result: ExecSummary::from(&exec),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_trusted(
        &self,
        submission: &Submission,
        account: &ResolvedAccount,
        normalized: &str,
        argv: &[String],
        report: &ComplianceReport,
        session: TrustSession,
        started: std::time::Instant,
    ) -> GatewayResult<AdmissionDecision> {
        let mut record = self.base_record(
            submission,
            account,
            normalized,
            RequestStatus::TrustAutoApproved,
        );
        record.decision_type = Some(DecisionType::TrustAutoApproved);
        record.compliance_findings = report.findings.clone();

        let exec = self
            .engine
            .run(&record.request_id, argv.to_vec(), account.role_arn.as_deref())
            .await;
        apply_exec(&mut record, &exec);

        let now = Timestamp::now();
        let message = notify::trust_executed_message(&record, &session, now);
        let request_id = record.request_id.clone();
        if let Err(e) = self.store.put_new(record).await {
            tracing::warn!(error = %e, "failed to persist trust-approved record");
        }
        if let Err(e) = self.notifier.send_silent(&message).await {
            tracing::warn!(error = %e, "trust notification failed");
        }

        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            bouncer_core::ActionKind::Execute,
            DecisionType::TrustAutoApproved,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            None,
            vec![format!("trust session {}", session.trust_id)],
            elapsed_ms(started),
        ));

        Ok(AdmissionDecision::TrustAutoApproved {
            request_id,
            result: ExecSummary::from(&exec),
            commands_used: session.commands_used,
            commands_max: session.commands_max,
            remaining_seconds: session.remaining_seconds(now),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_granted(
        &self,
        submission: &Submission,
        account: &ResolvedAccount,
        granted_cmd: &str,
        argv: &[String],
        report: &ComplianceReport,
        grant_id: GrantId,
        started: std::time::Instant,
    ) -> GatewayResult<AdmissionDecision> {
        let mut record = self.base_record(
            submission,
            account,
            granted_cmd,
            RequestStatus::GrantAutoApproved,
        );
        record.decision_type = Some(DecisionType::GrantAutoApproved);
        record.compliance_findings = report.findings.clone();

        let exec = self
            .engine
            .run(&record.request_id, argv.to_vec(), account.role_arn.as_deref())
            .await;
        apply_exec(&mut record, &exec);

        let request_id = record.request_id.clone();
        if let Err(e) = self.store.put_new(record).await {
            tracing::warn!(error = %e, "failed to persist grant-approved record");
        }

        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            bouncer_core::ActionKind::Execute,
            DecisionType::GrantAutoApproved,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            None,
            vec![format!("grant session {grant_id}")],
            elapsed_ms(started),
        ));

        Ok(AdmissionDecision::GrantAutoApproved {
            request_id,
            result: ExecSummary::from(&exec),
            grant_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_pending(
        &self,
        submission: Submission,
        account: ResolvedAccount,
        normalized: String,
        classification: Classification,
        report: ComplianceReport,
        risk: bouncer_policy::RiskReport,
        started: std::time::Instant,
    ) -> GatewayResult<AdmissionDecision> {
        let mut record = self.base_record(&submission, &account, &normalized, RequestStatus::Pending);
        record = record
            .with_admission_metadata(report.findings.clone(), Some(risk.score), risk.hits.clone())
            .with_idempotency_key(submission.idempotency_key.clone());
        let request_id = record.request_id.clone();
        let display_summary = record.display_summary.clone();
        let expires_at = record.expires_at;

        self.store.put_new(record.clone()).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to persist pending record");
            GatewayError::Internal
        })?;

        // Emit the approval message. One retry; a record left without a
        // message stays pending and is surfaced by /pending.
        let dangerous_reason = match &classification {
            Classification::Dangerous { reason } => Some(reason.as_str()),
            _ => None,
        };
        let message = notify::approval_message(
            &record,
            dangerous_reason,
            self.trust_ttl_minutes,
            Timestamp::now(),
        );
        let mut sent = self.notifier.send(&message).await;
        if sent.is_err() {
            tracing::warn!("approval notification failed, retrying once");
            sent = self.notifier.send(&message).await;
        }
        match sent {
            Ok(message_id) => {
                if let Err(e) = self.store.set_message_id(&request_id, message_id).await {
                    tracing::warn!(error = %e, "failed to bind message id");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "approval notification failed twice, record stays pending");
            },
        }

        let mut reasons = vec![format!("classified {classification}")];
        if report.forces_manual() {
            reasons.push("compliance forces manual review".to_owned());
        }
        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            bouncer_core::ActionKind::Execute,
            DecisionType::PendingApproval,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            Some(risk.score),
            reasons,
            elapsed_ms(started),
        ));

        Ok(AdmissionDecision::Pending {
            request_id,
            display_summary,
            expires_at,
        })
    }

    fn base_record(
        &self,
        submission: &Submission,
        account: &ResolvedAccount,
        normalized: &str,
        status: RequestStatus,
    ) -> ApprovalRequest {
        let expires_in = submission
            .timeout_seconds
            .unwrap_or(self.approval.expiry_seconds)
            .min(self.approval.long_runner_cap_seconds);
        ApprovalRequest::new(
            RequestPayload::Execute {
                command: normalized.to_owned(),
                assume_role: account.role_arn.clone(),
            },
            status,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            account.name.clone(),
            submission.reason.clone(),
            expires_in,
            self.approval.expiry_grace_seconds,
        )
    }

    fn audit_unpersisted(
        &self,
        submission: &Submission,
        account: &ResolvedAccount,
        decision: DecisionType,
        reasons: Vec<String>,
        started: std::time::Instant,
    ) {
        self.audit.record(&AuditEntry::new(
            RequestId::new(),
            bouncer_core::ActionKind::Execute,
            decision,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            None,
            reasons,
            elapsed_ms(started),
        ));
    }
}

/// Rebuild a decision from an existing record (idempotent replay).
fn replay_decision(record: &ApprovalRequest) -> AdmissionDecision {
    if record.status == RequestStatus::Pending {
        return AdmissionDecision::Pending {
            request_id: record.request_id.clone(),
            display_summary: record.display_summary.clone(),
            expires_at: record.expires_at,
        };
    }
    let result = record.result.as_ref().map(|result| ExecSummary {
        result: result.clone(),
        exit_code: record.exit_code.unwrap_or(0),
        total_pages: 1,
        next_page: None,
    });
    AdmissionDecision::Completed {
        request_id: record.request_id.clone(),
        status: record.status,
        result,
    }
}

fn apply_exec(record: &mut ApprovalRequest, exec: &ExecReport) {
    record.result = Some(exec.truncated_result.clone());
    record.exit_code = Some(exec.exit_code);
    record.execution_time_ms = Some(exec.duration_ms);
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
