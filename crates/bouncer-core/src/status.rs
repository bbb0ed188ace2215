//! Approval request lifecycle and the transitions it permits.
//!
//! The status machine is deliberately small: once a record leaves `pending`
//! it never returns, and the only multi-step path is
//! `pending -> approved -> executed_ok | executed_error`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an approval request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for an approver decision.
    Pending,
    /// Approved by a human; execution in flight or about to start.
    Approved,
    /// Denied by a human.
    Denied,
    /// Safelisted and executed without human involvement.
    AutoApproved,
    /// Executed under an active trust session.
    TrustAutoApproved,
    /// Executed under an approved grant session.
    GrantAutoApproved,
    /// Rejected by the blocklist.
    Blocked,
    /// Rejected by a CRITICAL compliance rule.
    ComplianceRejected,
    /// Rejected by the rate limiter.
    RateLimited,
    /// Expired before an approver acted.
    Expired,
    /// Approved and the command completed with exit code zero.
    ExecutedOk,
    /// Approved and the command completed with a non-zero exit code.
    ExecutedError,
}

impl RequestStatus {
    /// Whether this status permits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Approved)
    }

    /// Whether the status machine allows the `self -> next` edge.
    ///
    /// `pending` may move to `approved`, `denied`, or `expired`; `approved`
    /// may move to an execution result. Everything else is frozen.
    #[must_use]
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Approved | Self::Denied | Self::Expired),
            Self::Approved => matches!(next, Self::ExecutedOk | Self::ExecutedError),
            _ => false,
        }
    }

    /// Stable snake_case label, matching the serde rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::AutoApproved => "auto_approved",
            Self::TrustAutoApproved => "trust_auto_approved",
            Self::GrantAutoApproved => "grant_auto_approved",
            Self::Blocked => "blocked",
            Self::ComplianceRejected => "compliance_rejected",
            Self::RateLimited => "rate_limited",
            Self::Expired => "expired",
            Self::ExecutedOk => "executed_ok",
            Self::ExecutedError => "executed_error",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request was resolved, for the audit trail and decision metadata.
///
/// Distinct from [`RequestStatus`]: a record that ends `executed_ok` still
/// carries the decision that got it there (`approved` vs
/// `trust_auto_approved` vs ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Enqueued for human review.
    PendingApproval,
    /// Executed off the safelist.
    AutoApproved,
    /// Executed under a trust session.
    TrustAutoApproved,
    /// Executed under a grant session.
    GrantAutoApproved,
    /// A human pressed approve.
    Approved,
    /// A human pressed deny.
    Denied,
    /// Matched the blocklist.
    Blocked,
    /// Hit a CRITICAL compliance rule.
    ComplianceRejected,
    /// Hit the rate limiter.
    RateLimited,
    /// Timed out waiting for an approver.
    Expired,
}

impl DecisionType {
    /// Stable snake_case label, matching the serde rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::AutoApproved => "auto_approved",
            Self::TrustAutoApproved => "trust_auto_approved",
            Self::GrantAutoApproved => "grant_auto_approved",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Blocked => "blocked",
            Self::ComplianceRejected => "compliance_rejected",
            Self::RateLimited => "rate_limited",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RequestStatus; 12] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Denied,
        RequestStatus::AutoApproved,
        RequestStatus::TrustAutoApproved,
        RequestStatus::GrantAutoApproved,
        RequestStatus::Blocked,
        RequestStatus::ComplianceRejected,
        RequestStatus::RateLimited,
        RequestStatus::Expired,
        RequestStatus::ExecutedOk,
        RequestStatus::ExecutedError,
    ];

    #[test]
    fn test_pending_exits_once() {
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Approved));
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Denied));
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Expired));
        assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::ExecutedOk));
        assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::Pending));
    }

    #[test]
    fn test_approved_resolves_to_result() {
        assert!(RequestStatus::Approved.can_transition_to(RequestStatus::ExecutedOk));
        assert!(RequestStatus::Approved.can_transition_to(RequestStatus::ExecutedError));
        assert!(!RequestStatus::Approved.can_transition_to(RequestStatus::Denied));
    }

    #[test]
    fn test_terminal_statuses_are_frozen() {
        for status in ALL {
            if status.is_terminal() {
                for next in ALL {
                    assert!(
                        !status.can_transition_to(next),
                        "{status} must not transition to {next}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_denied_never_becomes_approved() {
        assert!(!RequestStatus::Denied.can_transition_to(RequestStatus::Approved));
    }

    #[test]
    fn test_labels_roundtrip_serde() {
        for status in ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            let back: RequestStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }
}
