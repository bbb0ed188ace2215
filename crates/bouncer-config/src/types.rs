//! Configuration types.
//!
//! Every section carries `#[serde(default)]` so a bare `[section]` header
//! (or an absent one) yields working values. Secrets never appear in
//! `Debug` output or serialized form.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared secrets and the approver whitelist.
    pub auth: AuthSection,
    /// Account defaults and table names.
    pub accounts: AccountsSection,
    /// Trust-session budgets.
    pub trust: TrustSection,
    /// Grant-session limits.
    pub grant: GrantSection,
    /// Rate-limiter window and caps.
    pub rate: RateSection,
    /// Approval expiry windows.
    pub approval: ApprovalSection,
    /// Result paging knobs.
    pub paging: PagingSection,
    /// Optional rule-file overrides.
    pub rules: RulesSection,
    /// Upload and presigned-URL policy.
    pub upload: UploadSection,
    /// Deploy front-end settings.
    pub deploy: DeploySection,
    /// Telegram notifier settings.
    pub telegram: TelegramSection,
}

/// Shared secrets and approver identities.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Secret the agent presents on every API call.
    pub request_secret: String,
    /// Secret the notifier presents on every callback.
    pub callback_secret: String,
    /// Chat identities allowed to approve.
    pub approver_whitelist: BTreeSet<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            request_secret: String::new(),
            callback_secret: String::new(),
            approver_whitelist: BTreeSet::new(),
        }
    }
}

impl std::fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSection")
            .field("has_request_secret", &!self.request_secret.is_empty())
            .field("has_callback_secret", &!self.callback_secret.is_empty())
            .field("approver_whitelist", &self.approver_whitelist)
            .finish()
    }
}

impl Serialize for AuthSection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Secrets are intentionally omitted.
        let mut state = serializer.serialize_struct("AuthSection", 1)?;
        state.serialize_field("approver_whitelist", &self.approver_whitelist)?;
        state.end()
    }
}

/// Account defaults and store table names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsSection {
    /// Account used when a submission names none.
    pub default_account_id: String,
    /// Approval-request table name.
    pub requests_table_name: String,
    /// Accounts table name.
    pub accounts_table_name: String,
}

impl Default for AccountsSection {
    fn default() -> Self {
        Self {
            default_account_id: String::new(),
            requests_table_name: "bouncer-approval-requests".to_owned(),
            accounts_table_name: "bouncer-accounts".to_owned(),
        }
    }
}

/// Trust-session budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSection {
    /// Session lifetime in minutes.
    pub ttl_minutes: u64,
    /// Command budget.
    pub max_commands: u32,
    /// Upload budget.
    pub max_uploads: u32,
    /// Total upload bytes.
    pub max_bytes: u64,
    /// Per-file upload cap.
    pub per_upload_bytes: u64,
}

impl Default for TrustSection {
    fn default() -> Self {
        Self {
            ttl_minutes: 10,
            max_commands: 20,
            max_uploads: 5,
            max_bytes: 20 * 1024 * 1024,
            per_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Grant-session limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantSection {
    /// Maximum TTL in minutes.
    pub ttl_max_minutes: u64,
    /// Maximum commands per bundle.
    pub max_commands: usize,
    /// Total execution budget.
    pub max_executions: u32,
    /// Seconds a pending bundle waits for approval.
    pub approval_timeout_seconds: u64,
}

impl Default for GrantSection {
    fn default() -> Self {
        Self {
            ttl_max_minutes: 60,
            max_commands: 20,
            max_executions: 50,
            approval_timeout_seconds: 300,
        }
    }
}

/// Rate-limiter knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSection {
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Maximum submissions per window.
    pub max_in_window: u32,
    /// Maximum simultaneously pending records per source.
    pub max_pending_per_source: u32,
}

impl Default for RateSection {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_in_window: 5,
            max_pending_per_source: 10,
        }
    }
}

/// Approval expiry windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Seconds a pending approval stays actionable.
    pub expiry_seconds: u64,
    /// Upper bound for caller-requested long-running approvals.
    pub long_runner_cap_seconds: u64,
    /// Grace added to storage TTLs past expiry.
    pub expiry_grace_seconds: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            expiry_seconds: 300,
            long_runner_cap_seconds: 900,
            expiry_grace_seconds: 60,
        }
    }
}

/// Result paging knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingSection {
    /// Characters per page.
    pub page_size_chars: usize,
    /// Characters kept inline on the record.
    pub result_truncate_chars: usize,
    /// Seconds pages stay retrievable.
    pub page_ttl_seconds: u64,
}

impl Default for PagingSection {
    fn default() -> Self {
        Self {
            page_size_chars: 3500,
            result_truncate_chars: 1000,
            page_ttl_seconds: 3600,
        }
    }
}

/// Optional rule-file overrides. Built-in tables apply when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    /// Classifier blocked-pattern file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_patterns_file: Option<PathBuf>,
    /// Classifier safelist file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safelist_patterns_file: Option<PathBuf>,
    /// Classifier danger-pattern file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub danger_patterns_file: Option<PathBuf>,
    /// Compliance rule file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_rules_file: Option<PathBuf>,
    /// Risk rule file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_rules_file: Option<PathBuf>,
}

/// Upload and presigned-URL policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    /// Bucket approved uploads land in.
    pub upload_bucket: String,
    /// Bucket presigned URLs stage into.
    pub staging_bucket: String,
    /// File extensions never accepted.
    pub blocked_extensions: Vec<String>,
    /// Minimum presigned expiry in seconds.
    pub presigned_min_expires: u64,
    /// Maximum presigned expiry in seconds.
    pub presigned_max_expires: u64,
    /// Maximum files per presigned batch.
    pub max_batch_files: usize,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            upload_bucket: String::new(),
            staging_bucket: String::new(),
            blocked_extensions: [".exe", ".dll", ".so", ".sh", ".bat", ".cmd", ".ps1"]
                .map(str::to_owned)
                .to_vec(),
            presigned_min_expires: 60,
            presigned_max_expires: 3600,
            max_batch_files: 50,
        }
    }
}

/// Deploy front-end settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// Whether the deploy surface is exposed at all.
    pub enabled: bool,
    /// Deploy orchestrator endpoint.
    pub endpoint: String,
}

/// Telegram notifier settings.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    /// Bot token.
    pub bot_token: String,
    /// Chat the approval messages post to.
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("has_bot_token", &!self.bot_token.is_empty())
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl Serialize for TelegramSection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // The bot token is intentionally omitted.
        let mut state = serializer.serialize_struct("TelegramSection", 1)?;
        state.serialize_field("chat_id", &self.chat_id)?;
        state.end()
    }
}
