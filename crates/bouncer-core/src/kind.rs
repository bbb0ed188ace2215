//! Action kinds carried by approval requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of privileged action a request asks for.
///
/// The kind selects the payload shape, the notification layout, and the
/// callback vocabulary used by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Run a CLI command against a cloud account.
    Execute,
    /// Upload a single file to the upload bucket.
    Upload,
    /// Upload a batch of files under one manifest.
    UploadBatch,
    /// Register a new target account.
    AddAccount,
    /// Remove a registered account.
    RemoveAccount,
    /// Start a build-and-deploy workflow.
    Deploy,
    /// Pre-approve a bundle of commands (grant session).
    Grant,
    /// Audit record for a presigned-URL issuance (no approval path).
    PresignedAudit,
}

impl ActionKind {
    /// Whether requests of this kind must carry a non-empty display summary.
    ///
    /// Presigned audits are synthetic records and are exempt.
    #[must_use]
    pub fn requires_display_summary(self) -> bool {
        !matches!(self, Self::PresignedAudit)
    }

    /// Stable snake_case label, matching the serde rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Upload => "upload",
            Self::UploadBatch => "upload_batch",
            Self::AddAccount => "add_account",
            Self::RemoveAccount => "remove_account",
            Self::Deploy => "deploy",
            Self::Grant => "grant",
            Self::PresignedAudit => "presigned_audit",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_labels_match_display() {
        for kind in [
            ActionKind::Execute,
            ActionKind::Upload,
            ActionKind::UploadBatch,
            ActionKind::AddAccount,
            ActionKind::RemoveAccount,
            ActionKind::Deploy,
            ActionKind::Grant,
            ActionKind::PresignedAudit,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_display_summary_requirement() {
        assert!(ActionKind::Execute.requires_display_summary());
        assert!(!ActionKind::PresignedAudit.requires_display_summary());
    }
}
