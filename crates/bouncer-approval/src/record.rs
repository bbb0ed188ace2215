//! The `ApprovalRequest` record.
//!
//! One record per privileged action. Payload fields are immutable after
//! creation; the only mutations are the status transitions of
//! [`RequestStatus`](bouncer_core::RequestStatus), applied through the
//! store's conditional update, plus the late binding of the notification
//! `message_id`.

use serde::{Deserialize, Serialize};

use bouncer_core::{
    ActionKind, DecisionType, GrantId, MessageId, RequestId, RequestStatus, Timestamp,
};
use bouncer_policy::ComplianceFinding;

/// Maximum length of a display summary.
const SUMMARY_MAX: usize = 100;

/// A file in an upload manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Bare filename (no directories).
    pub filename: String,
    /// MIME type the uploader declared.
    pub content_type: String,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Object key in the staging or upload bucket, once assigned.
    #[serde(default)]
    pub s3_key: Option<String>,
}

/// Resolved commit info for a deploy request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit SHA.
    pub sha: String,
    /// Abbreviated SHA for display.
    pub short: String,
    /// First line of the commit message.
    pub message: String,
}

/// Kind-specific payload of an approval request.
///
/// Immutable after creation (spec invariant: a record's payload never
/// changes once written).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "payload")]
pub enum RequestPayload {
    /// A CLI command to run.
    Execute {
        /// The normalized command string.
        command: String,
        /// Role to assume for cross-account execution, if any.
        assume_role: Option<String>,
    },
    /// A single file upload.
    Upload {
        /// The file to upload.
        file: FileSpec,
        /// Target bucket.
        bucket: String,
    },
    /// A batch of file uploads sharing one manifest.
    UploadBatch {
        /// Shared key prefix for the batch.
        batch_id: String,
        /// The files to upload.
        files: Vec<FileSpec>,
        /// Target bucket.
        bucket: String,
    },
    /// Register or replace an account entry.
    AccountAdd {
        /// Target account id.
        account_id: String,
        /// Display name.
        name: String,
        /// Role to assume when executing against this account.
        role_arn: Option<String>,
    },
    /// Remove an account entry.
    AccountRemove {
        /// Target account id.
        account_id: String,
        /// Display name at request time.
        name: String,
    },
    /// Start a deploy workflow.
    Deploy {
        /// Project identifier known to the deploy orchestrator.
        project_id: String,
        /// Branch to build.
        branch: String,
        /// Commit resolved at request time.
        commit: Option<CommitInfo>,
    },
    /// A grant-session approval (the session itself lives in the store).
    Grant {
        /// The grant session under review.
        grant_id: GrantId,
    },
    /// Audit-only record for a presigned-URL issuance.
    Presigned {
        /// Object key the URL was issued for.
        s3_key: String,
        /// Number of files (1 for single issuance).
        file_count: u32,
    },
}

impl RequestPayload {
    /// The action kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Execute { .. } => ActionKind::Execute,
            Self::Upload { .. } => ActionKind::Upload,
            Self::UploadBatch { .. } => ActionKind::UploadBatch,
            Self::AccountAdd { .. } => ActionKind::AddAccount,
            Self::AccountRemove { .. } => ActionKind::RemoveAccount,
            Self::Deploy { .. } => ActionKind::Deploy,
            Self::Grant { .. } => ActionKind::Grant,
            Self::Presigned { .. } => ActionKind::PresignedAudit,
        }
    }
}

/// Build the immutable display summary for a payload.
///
/// Always non-empty, at most 100 characters, ellipsised in the middle of
/// nothing important (tail-truncated).
#[must_use]
pub fn display_summary(payload: &RequestPayload) -> String {
    let text = match payload {
        RequestPayload::Execute { command, .. } => command.clone(),
        RequestPayload::Upload { file, bucket } => {
            format!("upload {} ({} B) to s3://{bucket}", file.filename, file.size_bytes)
        },
        RequestPayload::UploadBatch { files, bucket, .. } => {
            format!("upload {} files to s3://{bucket}", files.len())
        },
        RequestPayload::AccountAdd { account_id, name, .. } => {
            format!("add account {account_id} ({name})")
        },
        RequestPayload::AccountRemove { account_id, name } => {
            format!("remove account {account_id} ({name})")
        },
        RequestPayload::Deploy { project_id, branch, .. } => {
            format!("deploy {project_id} @ {branch}")
        },
        RequestPayload::Grant { grant_id } => format!("grant bundle {grant_id}"),
        RequestPayload::Presigned { s3_key, file_count } => {
            format!("presigned url x{file_count} for {s3_key}")
        },
    };
    truncate_summary(&text)
}

fn truncate_summary(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "(no summary)".to_owned();
    }
    if text.chars().count() <= SUMMARY_MAX {
        return text.to_owned();
    }
    let head: String = text.chars().take(SUMMARY_MAX - 1).collect();
    format!("{head}\u{2026}")
}

/// The central approval record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique, URL-safe record id.
    pub request_id: RequestId,
    /// Action kind (redundant with the payload tag; indexed separately).
    pub kind: ActionKind,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Immutable, human-readable one-liner set at creation.
    pub display_summary: String,
    /// Caller-supplied display identity; rate-limit and audit key.
    pub source: String,
    /// Caller-supplied stable trust key, distinct from `source`.
    pub trust_scope: Option<String>,
    /// Target cloud account.
    pub account_id: String,
    /// Display name of the target account.
    pub account_name: String,
    /// Caller-supplied justification.
    pub reason: String,
    /// Kind-specific payload; immutable after creation.
    pub payload: RequestPayload,

    /// Truncated command output, once executed.
    pub result: Option<String>,
    /// Executor exit code, once executed.
    pub exit_code: Option<i32>,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: Option<u64>,

    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
    /// When a pending record stops being actionable.
    pub expires_at: Timestamp,
    /// Storage TTL hint in seconds (expiry plus grace).
    pub ttl_hint_seconds: u64,

    /// Chat message bound to this record, for later edits.
    pub message_id: Option<MessageId>,
    /// Approver who resolved the record.
    pub approver_id: Option<String>,
    /// How the record was resolved.
    pub decision_type: Option<DecisionType>,
    /// Milliseconds from creation to resolution.
    pub latency_ms: Option<u64>,

    /// Compliance findings recorded at admission.
    #[serde(default)]
    pub compliance_findings: Vec<ComplianceFinding>,
    /// Risk score recorded at admission.
    pub risk_score: Option<u8>,
    /// Risk rule hits recorded at admission.
    #[serde(default)]
    pub hits: Vec<String>,
    /// Caller-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
}

impl ApprovalRequest {
    /// Create a new record in the given initial status.
    ///
    /// `expires_in_seconds` sets `expires_at` relative to now; the TTL hint
    /// adds `grace_seconds` on top.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payload: RequestPayload,
        status: RequestStatus,
        source: impl Into<String>,
        trust_scope: Option<String>,
        account_id: impl Into<String>,
        account_name: impl Into<String>,
        reason: impl Into<String>,
        expires_in_seconds: u64,
        grace_seconds: u64,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            request_id: RequestId::new(),
            kind: payload.kind(),
            status,
            display_summary: display_summary(&payload),
            source: source.into(),
            trust_scope,
            account_id: account_id.into(),
            account_name: account_name.into(),
            reason: reason.into(),
            payload,
            result: None,
            exit_code: None,
            execution_time_ms: None,
            created_at: now,
            updated_at: now,
            expires_at: now.plus_seconds(expires_in_seconds),
            ttl_hint_seconds: expires_in_seconds + grace_seconds,
            message_id: None,
            approver_id: None,
            decision_type: None,
            latency_ms: None,
            compliance_findings: Vec::new(),
            risk_score: None,
            hits: Vec::new(),
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Attach admission metadata (compliance findings + risk report).
    #[must_use]
    pub fn with_admission_metadata(
        mut self,
        findings: Vec<ComplianceFinding>,
        risk_score: Option<u8>,
        hits: Vec<String>,
    ) -> Self {
        self.compliance_findings = findings;
        self.risk_score = risk_score;
        self.hits = hits;
        self
    }

    /// Whether the record's approval window has passed.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_past(now)
    }

    /// The command string, for execute payloads.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match &self.payload {
            RequestPayload::Execute { command, .. } => Some(command),
            _ => None,
        }
    }
}

/// Fields a status transition may set, applied atomically with the
/// compare-and-swap inside the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    /// Truncated execution output.
    pub result: Option<String>,
    /// Executor exit code.
    pub exit_code: Option<i32>,
    /// Execution wall time in milliseconds.
    pub execution_time_ms: Option<u64>,
    /// Who resolved the record.
    pub approver_id: Option<String>,
    /// How the record was resolved.
    pub decision_type: Option<DecisionType>,
    /// Creation-to-resolution latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl RecordPatch {
    /// A patch carrying only a decision trail.
    #[must_use]
    pub fn decision(decision_type: DecisionType, approver_id: Option<String>) -> Self {
        Self {
            decision_type: Some(decision_type),
            approver_id,
            ..Self::default()
        }
    }

    /// Apply this patch to a record, stamping `updated_at`.
    pub fn apply(&self, record: &mut ApprovalRequest, status: RequestStatus) {
        record.status = status;
        record.updated_at = Timestamp::now();
        if let Some(result) = &self.result {
            record.result = Some(result.clone());
        }
        if let Some(code) = self.exit_code {
            record.exit_code = Some(code);
        }
        if let Some(ms) = self.execution_time_ms {
            record.execution_time_ms = Some(ms);
        }
        if let Some(approver) = &self.approver_id {
            record.approver_id = Some(approver.clone());
        }
        if let Some(decision) = self.decision_type {
            record.decision_type = Some(decision);
        }
        if let Some(latency) = self.latency_ms {
            record.latency_ms = Some(latency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execute_record(command: &str) -> ApprovalRequest {
        ApprovalRequest::new(
            RequestPayload::Execute {
                command: command.to_owned(),
                assume_role: None,
            },
            RequestStatus::Pending,
            "bot-A",
            Some("bot-A".to_owned()),
            "111111111111",
            "Dev",
            "testing",
            300,
            60,
        )
    }

    #[test]
    fn test_new_record_shape() {
        let record = execute_record("aws s3 ls");
        assert_eq!(record.kind, ActionKind::Execute);
        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(record.display_summary, "aws s3 ls");
        assert!(record.expires_at > record.created_at);
        assert_eq!(record.ttl_hint_seconds, 360);
    }

    #[test]
    fn test_display_summary_truncates_to_100() {
        let long = "aws s3 cp ".to_owned() + &"x".repeat(300);
        let record = execute_record(&long);
        assert!(record.display_summary.chars().count() <= 100);
        assert!(record.display_summary.ends_with('\u{2026}'));
    }

    #[test]
    fn test_display_summary_never_empty() {
        assert_eq!(truncate_summary("   "), "(no summary)");
    }

    #[test]
    fn test_upload_summary() {
        let payload = RequestPayload::UploadBatch {
            batch_id: "batch-1".to_owned(),
            files: vec![
                FileSpec {
                    filename: "a.html".to_owned(),
                    content_type: "text/html".to_owned(),
                    size_bytes: 10,
                    s3_key: None,
                },
                FileSpec {
                    filename: "b.html".to_owned(),
                    content_type: "text/html".to_owned(),
                    size_bytes: 20,
                    s3_key: None,
                },
            ],
            bucket: "staging".to_owned(),
        };
        assert_eq!(display_summary(&payload), "upload 2 files to s3://staging");
    }

    #[test]
    fn test_patch_applies_decision_trail() {
        let mut record = execute_record("aws s3 ls");
        let patch = RecordPatch {
            result: Some("ok".to_owned()),
            exit_code: Some(0),
            execution_time_ms: Some(42),
            approver_id: Some("approver-1".to_owned()),
            decision_type: Some(DecisionType::Approved),
            latency_ms: Some(1000),
        };
        patch.apply(&mut record, RequestStatus::Approved);
        assert_eq!(record.status, RequestStatus::Approved);
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(record.approver_id.as_deref(), Some("approver-1"));
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn test_serde_roundtrip() {
        let record = execute_record("aws ec2 describe-instances");
        let json = serde_json::to_string(&record).unwrap();
        let back: ApprovalRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, record.request_id);
        assert_eq!(back.payload, record.payload);
    }

    #[test]
    fn test_expiry_check() {
        let record = execute_record("aws s3 ls");
        let now = Timestamp::now();
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now.plus_seconds(1000)));
    }
}
