//! Audit entry type.

use serde::{Deserialize, Serialize};

use bouncer_core::{ActionKind, DecisionType, RequestId, Timestamp};

/// Retention hint for an audit entry.
///
/// Blocked and compliance rejections rotate out sooner than resolved
/// approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// 30 days.
    Short,
    /// 90 days.
    Long,
}

impl TtlClass {
    /// Retention in seconds.
    #[must_use]
    pub fn seconds(self) -> u64 {
        match self {
            Self::Short => 30 * 24 * 60 * 60,
            Self::Long => 90 * 24 * 60 * 60,
        }
    }

    /// The class appropriate for a decision.
    #[must_use]
    pub fn for_decision(decision: DecisionType) -> Self {
        match decision {
            DecisionType::Blocked | DecisionType::ComplianceRejected => Self::Short,
            _ => Self::Long,
        }
    }
}

/// One audited decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// The record the decision concerns.
    pub request_id: RequestId,
    /// Action kind.
    pub kind: ActionKind,
    /// How the request was resolved at this point.
    pub decision_type: DecisionType,
    /// Caller display identity.
    pub source: String,
    /// Trust key, when present.
    pub trust_scope: Option<String>,
    /// Target account.
    pub account_id: String,
    /// Risk score at decision time.
    pub score: Option<u8>,
    /// Reason codes explaining the decision.
    pub reasons: Vec<String>,
    /// Milliseconds spent deciding.
    pub latency_ms: u64,
    /// When the decision was made.
    pub at: Timestamp,
    /// Retention hint.
    pub ttl_class: TtlClass,
}

impl AuditEntry {
    /// Build an entry, deriving the retention class from the decision.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: RequestId,
        kind: ActionKind,
        decision_type: DecisionType,
        source: impl Into<String>,
        trust_scope: Option<String>,
        account_id: impl Into<String>,
        score: Option<u8>,
        reasons: Vec<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            request_id,
            kind,
            decision_type,
            source: source.into(),
            trust_scope,
            account_id: account_id.into(),
            score,
            reasons,
            latency_ms,
            at: Timestamp::now(),
            ttl_class: TtlClass::for_decision(decision_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_class_by_decision() {
        assert_eq!(
            TtlClass::for_decision(DecisionType::Blocked),
            TtlClass::Short
        );
        assert_eq!(
            TtlClass::for_decision(DecisionType::ComplianceRejected),
            TtlClass::Short
        );
        assert_eq!(
            TtlClass::for_decision(DecisionType::Approved),
            TtlClass::Long
        );
    }

    #[test]
    fn test_ttl_seconds() {
        assert_eq!(TtlClass::Short.seconds(), 2_592_000);
        assert_eq!(TtlClass::Long.seconds(), 7_776_000);
    }

    #[test]
    fn test_entry_serializes() {
        let entry = AuditEntry::new(
            RequestId::from("req-1"),
            ActionKind::Execute,
            DecisionType::AutoApproved,
            "bot",
            None,
            "acct",
            Some(5),
            vec!["safelist".to_owned()],
            12,
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("auto_approved"));
        assert!(json.contains("safelist"));
    }
}
