//! The agent-facing service.
//!
//! [`Bouncer`] wires the pipeline, dispatcher, session managers, paging,
//! uploads, accounts, and deploys behind one authenticated surface. Every
//! agent call presents the request secret; every notifier callback presents
//! the callback secret. There is no HTTP here — transports wrap these
//! methods and map [`GatewayError::status_code`] as they see fit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use bouncer_approval::{
    ApprovalRequest, ApprovalError, FileSpec, GrantLimits, GrantManager, GrantSession,
    GrantStatusView, MemoryStore, RequestPayload, Store, TrustManager, TrustOutcome, TrustSession,
};
use bouncer_audit::{AuditEntry, AuditLog, TracingSink};
use bouncer_command::{Classifier, ClassifierRules, CommandError, normalize};
use bouncer_config::Config;
use bouncer_core::{
    ActionKind, DecisionType, GatewayError, GatewayResult, GrantId, PageId, RequestId,
    RequestStatus, Timestamp, TrustId,
};
use bouncer_policy::{ComplianceChecker, PolicyError, RiskScorer};

use crate::accounts::{AccountStore, MemoryAccountStore, resolve_account, validate_account_id, validate_role_arn};
use crate::callback::CallbackEvent;
use crate::dispatch::WebhookDispatcher;
use crate::executor::ExecutionEngine;
use crate::notify;
use crate::paging::{PageView, Pager};
use crate::pipeline::{AdmissionDecision, AdmissionPipeline, ExecSummary, Submission};
use crate::rate::RateLimiter;
use crate::traits::{
    CommandExecutor, CredentialBroker, Deployer, Notifier, ObjectStore, PresignRequest,
};

/// Errors raised while wiring a [`Bouncer`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// A classifier rule file failed to load.
    #[error("classifier rules: {0}")]
    Classifier(#[from] CommandError),
    /// A compliance or risk rule file failed to load.
    #[error("policy rules: {0}")]
    Policy(#[from] PolicyError),
}

/// External collaborators injected into the service.
pub struct BouncerDeps {
    /// The chat transport.
    pub notifier: Arc<dyn Notifier>,
    /// The command executor.
    pub executor: Arc<dyn CommandExecutor>,
    /// Credential broker for cross-account roles.
    pub broker: Option<Arc<dyn CredentialBroker>>,
    /// Staging/upload object store.
    pub object_store: Arc<dyn ObjectStore>,
    /// Deploy orchestrator.
    pub deployer: Option<Arc<dyn Deployer>>,
    /// Account registry.
    pub accounts: Arc<dyn AccountStore>,
}

impl BouncerDeps {
    /// Deps with an in-memory account registry (tests, local runs).
    #[must_use]
    pub fn new(
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn CommandExecutor>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            notifier,
            executor,
            broker: None,
            object_store,
            deployer: None,
            accounts: Arc::new(MemoryAccountStore::new()),
        }
    }
}

/// Summary row returned by `list_pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSummary {
    /// Record id.
    pub request_id: RequestId,
    /// Action kind.
    pub kind: ActionKind,
    /// Immutable display summary.
    pub display_summary: String,
    /// Caller display identity.
    pub source: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Approval deadline.
    pub expires_at: Timestamp,
}

/// An issued presigned upload URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedGrant {
    /// The opaque URL.
    pub presigned_url: String,
    /// Object key in the staging bucket.
    pub s3_key: String,
    /// Full `s3://` URI of the staged object.
    pub s3_uri: String,
    /// When the URL stops working.
    pub expires_at: Timestamp,
    /// Batch prefix shared by all keys of a batch issuance.
    pub batch_id: Option<String>,
}

/// Outcome of `confirm_upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfirmation {
    /// Whether every key exists in the staging bucket.
    pub verified: bool,
    /// Keys that were not found.
    pub missing: Vec<String>,
}

/// Outcome of a deploy submission.
#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// Persisted for approval.
    Pending {
        /// Record id.
        request_id: RequestId,
        /// Resolved commit SHA.
        commit_sha: String,
        /// Abbreviated SHA.
        commit_short: String,
        /// First line of the commit message.
        commit_message: String,
    },
    /// A deploy is already running for the project.
    Conflict {
        /// The running deploy's id.
        running_deploy_id: String,
        /// ISO-8601 start time.
        started_at: String,
        /// Human-readable remaining estimate.
        estimated_remaining: String,
    },
}

/// Outcome of a grant bundle request.
#[derive(Debug, Clone)]
pub struct GrantRequestOutcome {
    /// The grant session id (use for `grant_execute`).
    pub grant_id: GrantId,
    /// The approval record tracking the bundle.
    pub request_id: RequestId,
    /// Count of plainly grantable entries.
    pub grantable: usize,
    /// Count of entries needing individual attention.
    pub requires_individual: usize,
    /// Seconds until the pending bundle expires.
    pub expires_in: u64,
}

/// Outcome of a grant execution.
#[derive(Debug, Clone)]
pub struct GrantExecuteOutcome {
    /// Record id of the execution.
    pub request_id: RequestId,
    /// Execution result.
    pub result: ExecSummary,
    /// Executions used after this one.
    pub executions_used: u32,
    /// Execution budget.
    pub max_executions: u32,
    /// Seconds left on the grant.
    pub remaining_seconds: u64,
}

/// A single-file upload submission.
#[derive(Debug, Clone)]
pub struct UploadSubmission {
    /// Bare filename.
    pub filename: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Staged object key, when already uploaded via presigned URL.
    pub s3_key: Option<String>,
    /// Caller justification.
    pub reason: String,
    /// Caller display identity.
    pub source: String,
    /// Stable trust key.
    pub trust_scope: String,
    /// Target account; `None` uses the default.
    pub account_id: Option<String>,
}

/// What an upload submission decided.
#[derive(Debug, Clone)]
pub enum UploadDecision {
    /// Promoted immediately under a trust session.
    TrustAutoApproved {
        /// Record id.
        request_id: RequestId,
        /// Final object URIs.
        uris: Vec<String>,
    },
    /// Persisted for approval.
    Pending {
        /// Record id.
        request_id: RequestId,
        /// Approval deadline.
        expires_at: Timestamp,
    },
}

/// The Bouncer service.
pub struct Bouncer<S> {
    config: Config,
    store: Arc<S>,
    accounts: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    object_store: Arc<dyn ObjectStore>,
    deployer: Option<Arc<dyn Deployer>>,
    classifier: Arc<Classifier>,
    compliance: Arc<ComplianceChecker>,
    trust: Arc<TrustManager<S>>,
    grant: Arc<GrantManager<S>>,
    rate: Arc<RateLimiter<S>>,
    pager: Arc<Pager<S>>,
    engine: Arc<ExecutionEngine<S>>,
    pipeline: AdmissionPipeline<S>,
    dispatcher: WebhookDispatcher<S>,
    audit: Arc<AuditLog>,
}

impl Bouncer<MemoryStore> {
    /// Convenience constructor over the in-memory store.
    ///
    /// # Errors
    ///
    /// Propagates rule-file loading failures.
    pub fn in_memory(config: Config, deps: BouncerDeps) -> Result<Self, BuildError> {
        Self::with_store(config, Arc::new(MemoryStore::new()), deps)
    }
}

impl<S: Store + 'static> Bouncer<S> {
    /// Wire the service over a store and the injected seams.
    ///
    /// # Errors
    ///
    /// Propagates rule-file loading failures.
    pub fn with_store(config: Config, store: Arc<S>, deps: BouncerDeps) -> Result<Self, BuildError> {
        let classifier_rule_file = config
            .rules
            .blocked_patterns_file
            .as_ref()
            .or(config.rules.danger_patterns_file.as_ref())
            .or(config.rules.safelist_patterns_file.as_ref());
        let classifier_rules = match classifier_rule_file {
            Some(path) => ClassifierRules::load_from_file(path)?,
            None => ClassifierRules::default(),
        };
        let classifier = Arc::new(Classifier::new(classifier_rules));
        let compliance = Arc::new(match &config.rules.compliance_rules_file {
            Some(path) => ComplianceChecker::load_from_file(path)?,
            None => ComplianceChecker::default(),
        });
        let risk = Arc::new(match &config.rules.risk_rules_file {
            Some(path) => RiskScorer::load_from_file(path)?,
            None => RiskScorer::default(),
        });

        let audit = Arc::new(AuditLog::new().with_sink(Box::new(TracingSink)));
        let rules = Arc::new(classifier.rules().clone());
        let trust = Arc::new(TrustManager::new(
            Arc::clone(&store),
            rules,
            config.upload.blocked_extensions.clone(),
        ));
        let grant = Arc::new(GrantManager::new(
            Arc::clone(&store),
            Arc::clone(&classifier),
            Arc::clone(&compliance),
            Arc::clone(&risk),
            GrantLimits {
                max_commands: config.grant.max_commands,
                ttl_max_minutes: config.grant.ttl_max_minutes,
                default_ttl_minutes: config.grant.ttl_max_minutes.min(30),
                max_executions: config.grant.max_executions,
                approval_timeout_seconds: config.grant.approval_timeout_seconds,
            },
        ));
        let rate = Arc::new(RateLimiter::new(
            Arc::clone(&store),
            config.rate.window_seconds,
            config.rate.max_in_window,
            config.rate.max_pending_per_source,
        ));
        let pager = Arc::new(Pager::new(
            Arc::clone(&store),
            config.paging.page_size_chars,
            config.paging.page_ttl_seconds,
        ));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&deps.executor),
            deps.broker.clone(),
            Pager::new(
                Arc::clone(&store),
                config.paging.page_size_chars,
                config.paging.page_ttl_seconds,
            ),
            config.paging.result_truncate_chars,
        ));

        let pipeline = AdmissionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&deps.accounts),
            Arc::clone(&classifier),
            Arc::clone(&compliance),
            Arc::clone(&risk),
            Arc::clone(&trust),
            Arc::clone(&grant),
            Arc::clone(&rate),
            Arc::clone(&engine),
            Arc::clone(&deps.notifier),
            Arc::clone(&audit),
            config.approval,
            config.trust.ttl_minutes,
            config.accounts.default_account_id.clone(),
        );
        let dispatcher = WebhookDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&deps.notifier),
            Arc::clone(&engine),
            Arc::clone(&trust),
            Arc::clone(&grant),
            Arc::clone(&deps.accounts),
            Arc::clone(&deps.object_store),
            deps.deployer.clone(),
            Arc::clone(&compliance),
            Arc::clone(&audit),
            config.auth.approver_whitelist.clone(),
            config.trust,
        );

        Ok(Self {
            config,
            store,
            accounts: deps.accounts,
            notifier: deps.notifier,
            object_store: deps.object_store,
            deployer: deps.deployer,
            classifier,
            compliance,
            trust,
            grant,
            rate,
            pager,
            engine,
            pipeline,
            dispatcher,
            audit,
        })
    }

    fn authenticate(&self, secret: &str) -> GatewayResult<()> {
        if secret == self.config.auth.request_secret && !secret.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Auth)
        }
    }

    fn authenticate_callback(&self, secret: &str) -> GatewayResult<()> {
        if secret == self.config.auth.callback_secret && !secret.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Auth)
        }
    }

    // -- commands -----------------------------------------------------------

    /// Submit a command for admission.
    ///
    /// # Errors
    ///
    /// See [`AdmissionPipeline::admit`].
    pub async fn submit_command(
        &self,
        secret: &str,
        submission: Submission,
    ) -> GatewayResult<AdmissionDecision> {
        self.authenticate(secret)?;
        self.pipeline.admit(submission).await
    }

    /// Full record projection for status polling.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown ids.
    pub async fn status(&self, secret: &str, request_id: &RequestId) -> GatewayResult<ApprovalRequest> {
        self.authenticate(secret)?;
        self.store
            .get(request_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "status lookup failed");
                GatewayError::Internal
            })?
            .ok_or_else(|| GatewayError::NotFound(request_id.to_string()))
    }

    /// Pending records, oldest first.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when the store fails.
    pub async fn list_pending(
        &self,
        secret: &str,
        source: Option<&str>,
        limit: Option<usize>,
    ) -> GatewayResult<Vec<PendingSummary>> {
        self.authenticate(secret)?;
        let records = self
            .store
            .list_pending(source, limit.unwrap_or(25))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "pending listing failed");
                GatewayError::Internal
            })?;
        Ok(records
            .into_iter()
            .map(|r| PendingSummary {
                request_id: r.request_id,
                kind: r.kind,
                display_summary: r.display_summary,
                source: r.source,
                created_at: r.created_at,
                expires_at: r.expires_at,
            })
            .collect())
    }

    /// Fetch one page of a long result.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown or expired pages.
    pub async fn get_page(&self, secret: &str, page_id: &PageId) -> GatewayResult<PageView> {
        self.authenticate(secret)?;
        self.pager.get_page(page_id).await
    }

    // -- grants -------------------------------------------------------------

    /// Request a pre-approved command bundle.
    ///
    /// # Errors
    ///
    /// Rejected bundles surface as [`GatewayError::Blocked`]; validation
    /// problems as [`GatewayError::Parse`].
    #[allow(clippy::too_many_arguments)]
    pub async fn request_grant(
        &self,
        secret: &str,
        commands: &[String],
        reason: &str,
        source: &str,
        trust_scope: Option<String>,
        account_id: Option<&str>,
        ttl_minutes: Option<u64>,
        allow_repeat: bool,
    ) -> GatewayResult<GrantRequestOutcome> {
        self.authenticate(secret)?;
        let now = Timestamp::now();
        self.rate.check(source, now).await?;

        let account = resolve_account(
            self.accounts.as_ref(),
            account_id,
            &self.config.accounts.default_account_id,
        )
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;

        let session = self
            .grant
            .request(commands, reason, source, &account.account_id, ttl_minutes, allow_repeat)
            .await
            .map_err(|e| match e {
                ApprovalError::GrantRejected(detail) => GatewayError::Blocked {
                    reason: format!("grant bundle rejected: {detail}"),
                    suggestion: "remove the blocked commands and request again".to_owned(),
                },
                ApprovalError::InvalidRequest(msg) | ApprovalError::Pattern(msg) => {
                    GatewayError::Parse(msg)
                },
                other => {
                    tracing::warn!(error = %other, "grant request failed");
                    GatewayError::Internal
                },
            })?;

        // The bundle rides the standard approval record machinery for
        // notification binding and expiry.
        let record = ApprovalRequest::new(
            RequestPayload::Grant {
                grant_id: session.grant_id.clone(),
            },
            RequestStatus::Pending,
            source,
            trust_scope,
            account.account_id.clone(),
            account.name.clone(),
            reason,
            self.config.grant.approval_timeout_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        let request_id = record.request_id.clone();
        self.store.put_new(record.clone()).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to persist grant approval record");
            GatewayError::Internal
        })?;

        let message = notify::grant_detail_message(&record, &session, now);
        match self.notifier.send(&message).await {
            Ok(message_id) => {
                if let Err(e) = self.store.set_message_id(&request_id, message_id).await {
                    tracing::warn!(error = %e, "failed to bind grant message id");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "grant notification failed, record stays pending");
            },
        }

        let grantable = session
            .commands_detail
            .iter()
            .filter(|d| d.category == bouncer_approval::GrantCategory::Grantable)
            .count();
        let requires_individual = session.commands_detail.len() - grantable;

        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            ActionKind::Grant,
            DecisionType::PendingApproval,
            source,
            None,
            account.account_id,
            None,
            vec![format!("grant bundle of {}", commands.len())],
            0,
        ));

        Ok(GrantRequestOutcome {
            grant_id: session.grant_id,
            request_id,
            grantable,
            requires_individual,
            expires_in: self.config.grant.approval_timeout_seconds,
        })
    }

    /// Execute one command under an approved grant.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown grants (or source mismatch),
    /// [`GatewayError::Conflict`] when the grant cannot authorize this
    /// execution (not in set, already used, exhausted, expired).
    pub async fn grant_execute(
        &self,
        secret: &str,
        grant_id: &GrantId,
        command: &str,
        source: &str,
        account_id: Option<&str>,
    ) -> GatewayResult<GrantExecuteOutcome> {
        self.authenticate(secret)?;
        let account = resolve_account(
            self.accounts.as_ref(),
            account_id,
            &self.config.accounts.default_account_id,
        )
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;

        // Compliance re-runs at execution time, before any budget is
        // consumed: a granted entry never executes past a finding that
        // would force manual review.
        let report = self.compliance.check_command(&normalize(command));
        if let Some(critical) = report.critical() {
            return Err(GatewayError::ComplianceRejected {
                rule_id: critical.rule_id.clone(),
                message: critical.reason.clone(),
            });
        }
        if report.forces_manual() {
            return Err(GatewayError::Conflict(
                "command now requires manual approval".to_owned(),
            ));
        }

        let (normalized, snapshot) = self
            .grant
            .authorize(grant_id, command, source, &account.account_id)
            .await
            .map_err(|e| match e {
                ApprovalError::GrantNotFound => GatewayError::NotFound("grant".to_owned()),
                ApprovalError::GrantRefused(reason) => GatewayError::Conflict(reason),
                other => {
                    tracing::warn!(error = %other, "grant authorization failed");
                    GatewayError::Internal
                },
            })?;

        let argv = bouncer_command::split_argv(&normalized)
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        let mut record = ApprovalRequest::new(
            RequestPayload::Execute {
                command: normalized.clone(),
                assume_role: account.role_arn.clone(),
            },
            RequestStatus::GrantAutoApproved,
            source,
            None,
            account.account_id.clone(),
            account.name.clone(),
            format!("grant execution under {grant_id}"),
            self.config.approval.expiry_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        record.decision_type = Some(DecisionType::GrantAutoApproved);

        let exec = self
            .engine
            .run(&record.request_id, argv, account.role_arn.as_deref())
            .await;
        record.result = Some(exec.truncated_result.clone());
        record.exit_code = Some(exec.exit_code);
        record.execution_time_ms = Some(exec.duration_ms);

        let request_id = record.request_id.clone();
        if let Err(e) = self.store.put_new(record).await {
            tracing::warn!(error = %e, "failed to persist grant execution record");
        }

        let now = Timestamp::now();
        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            ActionKind::Execute,
            DecisionType::GrantAutoApproved,
            source,
            None,
            account.account_id,
            None,
            vec![format!("grant session {grant_id}")],
            0,
        ));

        Ok(GrantExecuteOutcome {
            request_id,
            result: ExecSummary::from(&exec),
            executions_used: snapshot.executions_used,
            max_executions: snapshot.max_executions,
            remaining_seconds: snapshot.remaining_seconds(now),
        })
    }

    /// Grant status projection (source-gated).
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown grants or source mismatches.
    pub async fn grant_status(
        &self,
        secret: &str,
        grant_id: &GrantId,
        source: &str,
    ) -> GatewayResult<GrantStatusView> {
        self.authenticate(secret)?;
        self.grant
            .status(grant_id, source)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "grant status failed");
                GatewayError::Internal
            })?
            .ok_or_else(|| GatewayError::NotFound("grant".to_owned()))
    }

    /// Revoke a grant session.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown grants.
    pub async fn revoke_grant(&self, secret: &str, grant_id: &GrantId) -> GatewayResult<()> {
        self.authenticate(secret)?;
        let revoked = self.grant.revoke(grant_id).await.map_err(|e| {
            tracing::warn!(error = %e, "grant revoke failed");
            GatewayError::Internal
        })?;
        if revoked {
            Ok(())
        } else {
            Err(GatewayError::NotFound("grant".to_owned()))
        }
    }

    // -- trust --------------------------------------------------------------

    /// The active trust session for a scope/account pair.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when the store fails.
    pub async fn trust_status(
        &self,
        secret: &str,
        trust_scope: &str,
        account_id: Option<&str>,
    ) -> GatewayResult<Option<TrustSession>> {
        self.authenticate(secret)?;
        let account = resolve_account(
            self.accounts.as_ref(),
            account_id,
            &self.config.accounts.default_account_id,
        )
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;
        self.trust
            .status(trust_scope, &account.account_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "trust status failed");
                GatewayError::Internal
            })
    }

    /// Revoke a trust session.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown sessions.
    pub async fn revoke_trust(&self, secret: &str, trust_id: &TrustId) -> GatewayResult<()> {
        self.authenticate(secret)?;
        let revoked = self.trust.revoke(trust_id).await.map_err(|e| {
            tracing::warn!(error = %e, "trust revoke failed");
            GatewayError::Internal
        })?;
        if revoked {
            Ok(())
        } else {
            Err(GatewayError::NotFound("trust session".to_owned()))
        }
    }

    // -- uploads ------------------------------------------------------------

    /// Submit a single file upload for admission.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Parse`] for unsafe filenames,
    /// [`GatewayError::RateLimited`] on the rate stage, and
    /// [`GatewayError::Internal`] on store failures.
    pub async fn submit_upload(
        &self,
        secret: &str,
        submission: UploadSubmission,
    ) -> GatewayResult<UploadDecision> {
        self.authenticate(secret)?;
        self.submit_upload_inner(submission).await
    }

    /// Submit a batch of uploads sharing one manifest.
    ///
    /// # Errors
    ///
    /// As [`Self::submit_upload`]; additionally rejects oversized batches.
    pub async fn submit_upload_batch(
        &self,
        secret: &str,
        files: Vec<FileSpec>,
        reason: &str,
        source: &str,
        trust_scope: &str,
        account_id: Option<&str>,
    ) -> GatewayResult<UploadDecision> {
        self.authenticate(secret)?;
        if files.is_empty() {
            return Err(GatewayError::Parse("batch must not be empty".to_owned()));
        }
        if files.len() > self.config.upload.max_batch_files {
            return Err(GatewayError::Parse(format!(
                "batch of {} exceeds the {}-file limit",
                files.len(),
                self.config.upload.max_batch_files
            )));
        }
        for file in &files {
            sanitize_filename(&file.filename, &self.config.upload.blocked_extensions)
                .map_err(GatewayError::Parse)?;
        }

        let now = Timestamp::now();
        self.rate.check(source, now).await?;
        let account = resolve_account(
            self.accounts.as_ref(),
            account_id,
            &self.config.accounts.default_account_id,
        )
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;

        let batch_id = format!("batch-{}", Uuid::new_v4().simple());
        let bucket = self.upload_bucket(&account.account_id).await;
        let record = ApprovalRequest::new(
            RequestPayload::UploadBatch {
                batch_id,
                files,
                bucket,
            },
            RequestStatus::Pending,
            source,
            Some(trust_scope.to_owned()),
            account.account_id.clone(),
            account.name.clone(),
            reason,
            self.config.approval.expiry_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        let (request_id, expires_at) = self.persist_pending_with_message(record).await?;
        Ok(UploadDecision::Pending {
            request_id,
            expires_at,
        })
    }

    async fn submit_upload_inner(
        &self,
        submission: UploadSubmission,
    ) -> GatewayResult<UploadDecision> {
        sanitize_filename(&submission.filename, &self.config.upload.blocked_extensions)
            .map_err(GatewayError::Parse)?;

        let now = Timestamp::now();
        self.rate.check(&submission.source, now).await?;
        let account = resolve_account(
            self.accounts.as_ref(),
            submission.account_id.as_deref(),
            &self.config.accounts.default_account_id,
        )
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;

        let bucket = self.upload_bucket(&account.account_id).await;
        let file = FileSpec {
            filename: submission.filename.clone(),
            content_type: submission.content_type.clone(),
            size_bytes: submission.size_bytes,
            s3_key: submission.s3_key.clone(),
        };

        // Trust path: consume the upload budget atomically, then promote.
        let outcome = self
            .trust
            .try_consume_upload(
                &submission.trust_scope,
                &account.account_id,
                &submission.filename,
                submission.size_bytes,
            )
            .await;
        if let TrustOutcome::Approved(session) = outcome {
            let key = file.s3_key.clone().unwrap_or_else(|| file.filename.clone());
            let uri = self
                .object_store
                .promote(&bucket, &key)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "trust upload promotion failed");
                    GatewayError::Internal
                })?;

            let mut record = ApprovalRequest::new(
                RequestPayload::Upload { file, bucket },
                RequestStatus::TrustAutoApproved,
                submission.source.clone(),
                Some(submission.trust_scope.clone()),
                account.account_id.clone(),
                account.name.clone(),
                submission.reason.clone(),
                self.config.approval.expiry_seconds,
                self.config.approval.expiry_grace_seconds,
            );
            record.decision_type = Some(DecisionType::TrustAutoApproved);
            record.result = Some(uri.clone());
            record.exit_code = Some(0);
            let request_id = record.request_id.clone();
            if let Err(e) = self.store.put_new(record).await {
                tracing::warn!(error = %e, "failed to persist trust upload record");
            }

            self.audit.record(&AuditEntry::new(
                request_id.clone(),
                ActionKind::Upload,
                DecisionType::TrustAutoApproved,
                submission.source.clone(),
                Some(submission.trust_scope.clone()),
                account.account_id.clone(),
                None,
                vec![format!("trust session {}", session.trust_id)],
                0,
            ));
            return Ok(UploadDecision::TrustAutoApproved {
                request_id,
                uris: vec![uri],
            });
        }

        let record = ApprovalRequest::new(
            RequestPayload::Upload { file, bucket },
            RequestStatus::Pending,
            submission.source.clone(),
            Some(submission.trust_scope.clone()),
            account.account_id.clone(),
            account.name.clone(),
            submission.reason.clone(),
            self.config.approval.expiry_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        let (request_id, expires_at) = self.persist_pending_with_message(record).await?;
        Ok(UploadDecision::Pending {
            request_id,
            expires_at,
        })
    }

    async fn persist_pending_with_message(
        &self,
        record: ApprovalRequest,
    ) -> GatewayResult<(RequestId, Timestamp)> {
        let request_id = record.request_id.clone();
        let expires_at = record.expires_at;
        self.store.put_new(record.clone()).await.map_err(|e| {
            tracing::warn!(error = %e, "failed to persist pending record");
            GatewayError::Internal
        })?;
        let message = notify::approval_message(
            &record,
            None,
            self.config.trust.ttl_minutes,
            Timestamp::now(),
        );
        match self.notifier.send(&message).await {
            Ok(message_id) => {
                if let Err(e) = self.store.set_message_id(&request_id, message_id).await {
                    tracing::warn!(error = %e, "failed to bind message id");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "approval notification failed, record stays pending");
            },
        }
        self.audit.record(&AuditEntry::new(
            request_id.clone(),
            record.kind,
            DecisionType::PendingApproval,
            record.source.clone(),
            record.trust_scope.clone(),
            record.account_id.clone(),
            None,
            Vec::new(),
            0,
        ));
        Ok((request_id, expires_at))
    }

    async fn upload_bucket(&self, account_id: &str) -> String {
        if let Ok(Some(account)) = self.accounts.get(account_id).await
            && let Some(bucket) = account.upload_bucket
        {
            return bucket;
        }
        self.config.upload.upload_bucket.clone()
    }

    // -- presigned ----------------------------------------------------------

    /// Issue a presigned staging URL. No approval path; rate-limited and
    /// audited, with a silent notification.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Parse`] for bad filenames or expiry bounds,
    /// [`GatewayError::RateLimited`], or [`GatewayError::Internal`] when the
    /// signer fails.
    pub async fn request_presigned(
        &self,
        secret: &str,
        filename: &str,
        content_type: &str,
        reason: &str,
        source: &str,
        expires_in: u64,
    ) -> GatewayResult<PresignedGrant> {
        self.authenticate(secret)?;
        let grants = self
            .presign_batch(
                &[(filename.to_owned(), content_type.to_owned())],
                reason,
                source,
                expires_in,
                None,
            )
            .await?;
        grants.into_iter().next().ok_or(GatewayError::Internal)
    }

    /// Issue presigned URLs for a batch of files under one `batch_id`.
    ///
    /// # Errors
    ///
    /// As [`Self::request_presigned`]; additionally rejects oversized
    /// batches.
    pub async fn request_presigned_batch(
        &self,
        secret: &str,
        files: &[(String, String)],
        reason: &str,
        source: &str,
        expires_in: u64,
    ) -> GatewayResult<Vec<PresignedGrant>> {
        self.authenticate(secret)?;
        if files.is_empty() {
            return Err(GatewayError::Parse("batch must not be empty".to_owned()));
        }
        if files.len() > self.config.upload.max_batch_files {
            return Err(GatewayError::Parse(format!(
                "batch of {} exceeds the {}-file limit",
                files.len(),
                self.config.upload.max_batch_files
            )));
        }
        let batch_id = format!("batch-{}", Uuid::new_v4().simple());
        self.presign_batch(files, reason, source, expires_in, Some(batch_id)).await
    }

    async fn presign_batch(
        &self,
        files: &[(String, String)],
        reason: &str,
        source: &str,
        expires_in: u64,
        batch_id: Option<String>,
    ) -> GatewayResult<Vec<PresignedGrant>> {
        if expires_in < self.config.upload.presigned_min_expires
            || expires_in > self.config.upload.presigned_max_expires
        {
            return Err(GatewayError::Parse(format!(
                "expires_in must be within [{}, {}] seconds",
                self.config.upload.presigned_min_expires, self.config.upload.presigned_max_expires
            )));
        }
        let now = Timestamp::now();
        self.rate.check(source, now).await?;

        let bucket = self.config.upload.staging_bucket.clone();
        let date = now.to_rfc3339();
        let day = date.get(..10).unwrap_or("unknown").to_owned();
        let mut grants = Vec::with_capacity(files.len());
        for (filename, content_type) in files {
            sanitize_filename(filename, &self.config.upload.blocked_extensions)
                .map_err(GatewayError::Parse)?;
            let key = match &batch_id {
                Some(batch_id) => format!("uploads/{day}/{batch_id}/{filename}"),
                None => format!("uploads/{day}/{}/{filename}", Uuid::new_v4().simple()),
            };
            let url = self
                .object_store
                .presign_put(&PresignRequest {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    content_type: content_type.clone(),
                    content_length_range: (1, self.config.trust.per_upload_bytes),
                    expires_in,
                })
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "presign failed");
                    GatewayError::Internal
                })?;
            grants.push(PresignedGrant {
                presigned_url: url.url,
                s3_uri: format!("s3://{bucket}/{key}"),
                s3_key: key,
                expires_at: url.expires_at,
                batch_id: batch_id.clone(),
            });
        }

        let keys: Vec<String> = grants.iter().map(|g| g.s3_key.clone()).collect();
        let record_id = RequestId::new();
        self.audit.record(&AuditEntry::new(
            record_id,
            ActionKind::PresignedAudit,
            DecisionType::AutoApproved,
            source,
            None,
            "staging".to_owned(),
            None,
            keys.clone(),
            0,
        ));
        let message = notify::presigned_message(source, &keys, expires_in);
        if let Err(e) = self.notifier.send_silent(&message).await {
            tracing::warn!(error = %e, "presigned notification failed");
        }
        tracing::debug!(source, reason, files = files.len(), "presigned urls issued");

        Ok(grants)
    }

    /// Verify that a batch's staged keys actually exist.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when the object store fails.
    pub async fn confirm_upload(
        &self,
        secret: &str,
        batch_id: &str,
        keys: &[String],
    ) -> GatewayResult<UploadConfirmation> {
        self.authenticate(secret)?;
        let bucket = &self.config.upload.staging_bucket;
        let mut missing = Vec::new();
        for key in keys {
            if !key.contains(batch_id) {
                missing.push(key.clone());
                continue;
            }
            match self.object_store.head_object(bucket, key).await {
                Ok(true) => {},
                Ok(false) => missing.push(key.clone()),
                Err(e) => {
                    tracing::warn!(error = %e, "head_object failed");
                    return Err(GatewayError::Internal);
                },
            }
        }
        self.audit.record(&AuditEntry::new(
            RequestId::new(),
            ActionKind::PresignedAudit,
            DecisionType::AutoApproved,
            "confirm_upload".to_owned(),
            None,
            "staging".to_owned(),
            None,
            vec![format!("batch {batch_id}: {} missing", missing.len())],
            0,
        ));
        Ok(UploadConfirmation {
            verified: missing.is_empty(),
            missing,
        })
    }

    // -- accounts -----------------------------------------------------------

    /// Submit an account registration for approval.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Parse`] for malformed ids/ARNs.
    pub async fn add_account(
        &self,
        secret: &str,
        account_id: &str,
        name: &str,
        role_arn: Option<&str>,
        reason: &str,
        source: &str,
    ) -> GatewayResult<RequestId> {
        self.authenticate(secret)?;
        validate_account_id(account_id).map_err(GatewayError::Parse)?;
        if let Some(arn) = role_arn {
            validate_role_arn(arn).map_err(GatewayError::Parse)?;
        }
        let now = Timestamp::now();
        self.rate.check(source, now).await?;

        let record = ApprovalRequest::new(
            RequestPayload::AccountAdd {
                account_id: account_id.to_owned(),
                name: name.to_owned(),
                role_arn: role_arn.map(str::to_owned),
            },
            RequestStatus::Pending,
            source,
            None,
            account_id,
            name,
            reason,
            self.config.approval.expiry_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        let (request_id, _) = self.persist_pending_with_message(record).await?;
        Ok(request_id)
    }

    /// Submit an account removal for approval.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] when the account is not registered.
    pub async fn remove_account(
        &self,
        secret: &str,
        account_id: &str,
        reason: &str,
        source: &str,
    ) -> GatewayResult<RequestId> {
        self.authenticate(secret)?;
        let account = self
            .accounts
            .get(account_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "account lookup failed");
                GatewayError::Internal
            })?
            .ok_or_else(|| GatewayError::NotFound(format!("account {account_id}")))?;
        let now = Timestamp::now();
        self.rate.check(source, now).await?;

        let record = ApprovalRequest::new(
            RequestPayload::AccountRemove {
                account_id: account.account_id.clone(),
                name: account.name.clone(),
            },
            RequestStatus::Pending,
            source,
            None,
            account.account_id,
            account.name,
            reason,
            self.config.approval.expiry_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        let (request_id, _) = self.persist_pending_with_message(record).await?;
        Ok(request_id)
    }

    /// All registered accounts.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when the registry fails.
    pub async fn list_accounts(&self, secret: &str) -> GatewayResult<Vec<crate::accounts::Account>> {
        self.authenticate(secret)?;
        self.accounts.list().await.map_err(|e| {
            tracing::warn!(error = %e, "account listing failed");
            GatewayError::Internal
        })
    }

    /// The safelist, rendered for display.
    ///
    /// # Errors
    ///
    /// Only authentication failures.
    pub fn list_safelist(&self, secret: &str) -> GatewayResult<Vec<String>> {
        self.authenticate(secret)?;
        Ok(self.classifier.rules().safelist_display())
    }

    // -- deploy -------------------------------------------------------------

    /// Submit a deploy for approval, or report the running conflict.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] when the deploy surface is disabled,
    /// [`GatewayError::ComplianceRejected`] for critical template findings.
    pub async fn deploy(
        &self,
        secret: &str,
        project_id: &str,
        reason: &str,
        source: &str,
        branch: Option<&str>,
    ) -> GatewayResult<DeployOutcome> {
        self.authenticate(secret)?;
        if !self.config.deploy.enabled {
            return Err(GatewayError::NotFound("deploy surface is disabled".to_owned()));
        }
        let Some(deployer) = &self.deployer else {
            return Err(GatewayError::NotFound("deployer is not configured".to_owned()));
        };
        let branch = branch.unwrap_or("main");
        let now = Timestamp::now();
        self.rate.check(source, now).await?;

        if let Some(running) = deployer.running(project_id).await.map_err(|e| {
            tracing::warn!(error = %e, "deployer running check failed");
            GatewayError::Internal
        })? {
            return Ok(DeployOutcome::Conflict {
                running_deploy_id: running.deploy_id,
                started_at: running.started_at.to_rfc3339(),
                estimated_remaining: running.estimated_remaining,
            });
        }

        // Template scan: a critical finding rejects; anything else rides
        // into the (already manual) approval.
        let mut findings = Vec::new();
        match deployer.template(project_id).await {
            Ok(Some(template)) => {
                let report = self.compliance.check_template(&template);
                if let Some(critical) = report.critical() {
                    return Err(GatewayError::ComplianceRejected {
                        rule_id: critical.rule_id.clone(),
                        message: critical.reason.clone(),
                    });
                }
                findings = report.findings;
            },
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(error = %e, "template fetch failed, treating as manual-only");
            },
        }

        let commit = deployer
            .resolve_commit(project_id, branch)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "commit resolution failed");
                GatewayError::Internal
            })?;

        let mut record = ApprovalRequest::new(
            RequestPayload::Deploy {
                project_id: project_id.to_owned(),
                branch: branch.to_owned(),
                commit: Some(commit.clone()),
            },
            RequestStatus::Pending,
            source,
            None,
            self.config.accounts.default_account_id.clone(),
            "Deploy".to_owned(),
            reason,
            self.config.approval.expiry_seconds,
            self.config.approval.expiry_grace_seconds,
        );
        record.compliance_findings = findings;
        let (request_id, _) = self.persist_pending_with_message(record).await?;
        Ok(DeployOutcome::Pending {
            request_id,
            commit_sha: commit.sha,
            commit_short: commit.short,
            commit_message: commit.message,
        })
    }

    // -- callbacks ----------------------------------------------------------

    /// Handle a notifier callback.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Auth`] for a bad callback secret; everything else is
    /// carried by callback answers.
    pub async fn handle_callback(
        &self,
        callback_secret: &str,
        event: CallbackEvent,
    ) -> GatewayResult<()> {
        self.authenticate_callback(callback_secret)?;
        self.dispatcher.dispatch(event).await
    }

    /// TTL maintenance passthrough.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] when the store fails.
    pub async fn sweep_expired(&self, now: Timestamp) -> GatewayResult<u32> {
        self.store.sweep_expired(now).await.map_err(|e| {
            tracing::warn!(error = %e, "sweep failed");
            GatewayError::Internal
        })
    }

    /// The normalized form the gateway would match a command against.
    #[must_use]
    pub fn normalize_preview(&self, command: &str) -> String {
        normalize(command)
    }

    /// Direct access to the grant session state (admin surface).
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown grants.
    pub async fn grant_session(&self, secret: &str, grant_id: &GrantId) -> GatewayResult<GrantSession> {
        self.authenticate(secret)?;
        self.store
            .get_grant(grant_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "grant lookup failed");
                GatewayError::Internal
            })?
            .ok_or_else(|| GatewayError::NotFound("grant".to_owned()))
    }
}

/// Reject unsafe upload filenames.
fn sanitize_filename(filename: &str, blocked_extensions: &[String]) -> Result<(), String> {
    if filename.is_empty() {
        return Err("filename must not be empty".to_owned());
    }
    if filename.contains('\0') {
        return Err("filename contains NUL".to_owned());
    }
    if filename.contains("..") {
        return Err("filename contains path traversal".to_owned());
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err("filename contains a directory separator".to_owned());
    }
    let lower = filename.to_lowercase();
    for ext in blocked_extensions {
        if lower.ends_with(ext.as_str()) {
            return Err(format!("file extension blocked: {ext}"));
        }
    }
    Ok(())
}
