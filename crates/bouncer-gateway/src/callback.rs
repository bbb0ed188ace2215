//! Callback tokens.
//!
//! Buttons carry an opaque `kind:target` token; the dispatcher is the only
//! parser. Targets are request ids except for the two revoke kinds, which
//! address the session directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything an approver button can mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Approve a command.
    CmdApprove,
    /// Approve a command and open a trust session.
    CmdApproveTrust,
    /// Deny a command.
    CmdDeny,
    /// Confirm a dangerous command.
    DangerousConfirm,
    /// Approve every grantable entry of a grant bundle.
    GrantApproveAll,
    /// Approve only the safe entries of a grant bundle.
    GrantApproveSafe,
    /// Deny a grant bundle.
    GrantDeny,
    /// Revoke a trust session (target is the trust id).
    TrustRevoke,
    /// Revoke a grant session (target is the grant id).
    GrantRevoke,
    /// Approve adding an account.
    AccountAddApprove,
    /// Deny adding an account.
    AccountAddDeny,
    /// Approve removing an account.
    AccountRemoveApprove,
    /// Deny removing an account.
    AccountRemoveDeny,
    /// Approve a deploy.
    DeployApprove,
    /// Deny a deploy.
    DeployDeny,
    /// Approve a single upload.
    UploadApprove,
    /// Approve a single upload and open a trust session with upload budget.
    UploadApproveTrust,
    /// Deny a single upload.
    UploadDeny,
    /// Approve an upload batch.
    UploadBatchApprove,
    /// Approve an upload batch and open a trust session with upload budget.
    UploadBatchApproveTrust,
    /// Deny an upload batch.
    UploadBatchDeny,
}

impl CallbackKind {
    /// Stable token label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CmdApprove => "cmd_approve",
            Self::CmdApproveTrust => "cmd_approve_trust",
            Self::CmdDeny => "cmd_deny",
            Self::DangerousConfirm => "dangerous_confirm",
            Self::GrantApproveAll => "grant_approve_all",
            Self::GrantApproveSafe => "grant_approve_safe",
            Self::GrantDeny => "grant_deny",
            Self::TrustRevoke => "trust_revoke",
            Self::GrantRevoke => "grant_revoke",
            Self::AccountAddApprove => "account_add_approve",
            Self::AccountAddDeny => "account_add_deny",
            Self::AccountRemoveApprove => "account_remove_approve",
            Self::AccountRemoveDeny => "account_remove_deny",
            Self::DeployApprove => "deploy_approve",
            Self::DeployDeny => "deploy_deny",
            Self::UploadApprove => "upload_approve",
            Self::UploadApproveTrust => "upload_approve_trust",
            Self::UploadDeny => "upload_deny",
            Self::UploadBatchApprove => "upload_batch_approve",
            Self::UploadBatchApproveTrust => "upload_batch_approve_trust",
            Self::UploadBatchDeny => "upload_batch_deny",
        }
    }

    /// Parse a token label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Some(match label {
            "cmd_approve" => Self::CmdApprove,
            "cmd_approve_trust" => Self::CmdApproveTrust,
            "cmd_deny" => Self::CmdDeny,
            "dangerous_confirm" => Self::DangerousConfirm,
            "grant_approve_all" => Self::GrantApproveAll,
            "grant_approve_safe" => Self::GrantApproveSafe,
            "grant_deny" => Self::GrantDeny,
            "trust_revoke" => Self::TrustRevoke,
            "grant_revoke" => Self::GrantRevoke,
            "account_add_approve" => Self::AccountAddApprove,
            "account_add_deny" => Self::AccountAddDeny,
            "account_remove_approve" => Self::AccountRemoveApprove,
            "account_remove_deny" => Self::AccountRemoveDeny,
            "deploy_approve" => Self::DeployApprove,
            "deploy_deny" => Self::DeployDeny,
            "upload_approve" => Self::UploadApprove,
            "upload_approve_trust" => Self::UploadApproveTrust,
            "upload_deny" => Self::UploadDeny,
            "upload_batch_approve" => Self::UploadBatchApprove,
            "upload_batch_approve_trust" => Self::UploadBatchApproveTrust,
            "upload_batch_deny" => Self::UploadBatchDeny,
            _ => return None,
        })
    }

    /// Whether this kind denies rather than approves.
    #[must_use]
    pub fn is_deny(self) -> bool {
        matches!(
            self,
            Self::CmdDeny
                | Self::GrantDeny
                | Self::AccountAddDeny
                | Self::AccountRemoveDeny
                | Self::DeployDeny
                | Self::UploadDeny
                | Self::UploadBatchDeny
        )
    }

    /// Whether this kind opens a trust session after approval.
    #[must_use]
    pub fn opens_trust(self) -> bool {
        matches!(
            self,
            Self::CmdApproveTrust | Self::UploadApproveTrust | Self::UploadBatchApproveTrust
        )
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque token bound to a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackToken {
    /// What the button means.
    pub kind: CallbackKind,
    /// The id it acts on (request id, or session id for revokes).
    pub target: String,
}

impl CallbackToken {
    /// Build a token.
    #[must_use]
    pub fn new(kind: CallbackKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }

    /// Wire form: `kind:target`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.kind, self.target)
    }

    /// Parse the wire form. `None` for anything malformed.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let (label, target) = token.split_once(':')?;
        if target.is_empty() {
            return None;
        }
        Some(Self {
            kind: CallbackKind::parse(label)?,
            target: target.to_owned(),
        })
    }
}

/// A callback event as delivered by the notifier transport.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    /// The opaque token from the pressed button.
    pub token: String,
    /// Chat identity of whoever pressed it.
    pub approver_id: String,
    /// Transport handle for `answer_callback`.
    pub callback_id: String,
}
