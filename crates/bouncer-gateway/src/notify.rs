//! Approver-facing message construction.
//!
//! Messages are built as typed segments, never as markup strings. The one
//! escaping rule lives at the renderer: `Plain` segments are escaped for the
//! transport's markup, `Code`/`CodeBlock` segments go into code entities
//! unescaped (beyond transport entity requirements).

use bouncer_approval::{ApprovalRequest, GrantCategory, GrantSession, TrustSession};
use bouncer_core::{RequestStatus, Timestamp};

use crate::callback::{CallbackKind, CallbackToken};

/// Inline code threshold: longer command strings render as blocks.
const INLINE_CODE_MAX: usize = 60;

/// One piece of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// User or gateway text; renderers escape it.
    Plain(String),
    /// Short value rendered in an inline code entity; never markup-escaped.
    Code(String),
    /// Multi-line value rendered in a code block; never markup-escaped.
    CodeBlock(String),
    /// Bold header text; escaped like plain text.
    Title(String),
    /// Paragraph break.
    Break,
}

/// An approver-facing chat button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    /// Visible label.
    pub label: String,
    /// Encoded callback token.
    pub callback_data: String,
}

impl Button {
    fn new(label: &str, kind: CallbackKind, target: &str) -> Self {
        Self {
            label: label.to_owned(),
            callback_data: CallbackToken::new(kind, target).encode(),
        }
    }
}

/// A transport-agnostic message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    /// Ordered content segments.
    pub segments: Vec<Segment>,
    /// Button rows (empty for plain messages).
    pub buttons: Vec<Vec<Button>>,
}

impl Notification {
    /// A message with no buttons.
    #[must_use]
    pub fn text_only(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            buttons: Vec::new(),
        }
    }

    /// Concatenated plain rendering, for logs and tests.
    #[must_use]
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Plain(s) | Segment::Code(s) | Segment::Title(s) => out.push_str(s),
                Segment::CodeBlock(s) => {
                    out.push('\n');
                    out.push_str(s);
                    out.push('\n');
                },
                Segment::Break => out.push('\n'),
            }
        }
        out
    }
}

fn command_segment(command: &str) -> Segment {
    if command.len() <= INLINE_CODE_MAX && !command.contains('\n') {
        Segment::Code(command.to_owned())
    } else {
        Segment::CodeBlock(command.to_owned())
    }
}

fn header(record: &ApprovalRequest, title: &str) -> Vec<Segment> {
    let mut segments = vec![
        Segment::Title(title.to_owned()),
        Segment::Break,
        Segment::Plain(format!("🤖 source: {}", record.source)),
        Segment::Break,
        Segment::Plain(format!(
            "🏢 account: {} ({})",
            record.account_id, record.account_name
        )),
        Segment::Break,
        Segment::Plain(format!("💬 reason: {}", record.reason)),
        Segment::Break,
    ];
    segments.push(Segment::Plain("🆔 ".to_owned()));
    segments.push(Segment::Code(record.request_id.to_string()));
    segments.push(Segment::Break);
    segments
}

fn expiry_line(expires_at: Timestamp, now: Timestamp) -> Segment {
    Segment::Plain(format!("⏳ expires in {}s", expires_at.seconds_until(now)))
}

/// The pending-approval message for a record.
///
/// Button rows follow the kind: standard commands get approve /
/// trust-for-N-minutes / deny; dangerous commands get confirm / deny;
/// grants get approve-all / approve-safe / deny; uploads get approve /
/// approve+trust / deny; accounts and deploys get approve / deny.
#[must_use]
pub fn approval_message(
    record: &ApprovalRequest,
    dangerous_reason: Option<&str>,
    trust_ttl_minutes: u64,
    now: Timestamp,
) -> Notification {
    use bouncer_approval::RequestPayload;

    let id = record.request_id.as_str();
    let (title, buttons) = match (&record.payload, dangerous_reason) {
        (RequestPayload::Execute { .. }, Some(_)) => (
            "🚨 dangerous command needs confirmation",
            vec![vec![
                Button::new("⚠️ confirm", CallbackKind::DangerousConfirm, id),
                Button::new("❌ deny", CallbackKind::CmdDeny, id),
            ]],
        ),
        (RequestPayload::Execute { .. }, None) => (
            "🔐 approval required",
            vec![vec![
                Button::new("✅ approve", CallbackKind::CmdApprove, id),
                Button::new(
                    &format!("🔓 trust {trust_ttl_minutes} min"),
                    CallbackKind::CmdApproveTrust,
                    id,
                ),
                Button::new("❌ deny", CallbackKind::CmdDeny, id),
            ]],
        ),
        (RequestPayload::Grant { .. }, _) => (
            "📦 grant bundle requested",
            vec![vec![
                Button::new("✅ approve all", CallbackKind::GrantApproveAll, id),
                Button::new("🛡 approve safe only", CallbackKind::GrantApproveSafe, id),
                Button::new("❌ deny", CallbackKind::GrantDeny, id),
            ]],
        ),
        (RequestPayload::Upload { .. }, _) => (
            "📤 upload requested",
            vec![vec![
                Button::new("✅ approve", CallbackKind::UploadApprove, id),
                Button::new("🔓 approve + trust", CallbackKind::UploadApproveTrust, id),
                Button::new("❌ deny", CallbackKind::UploadDeny, id),
            ]],
        ),
        (RequestPayload::UploadBatch { .. }, _) => (
            "📤 upload batch requested",
            vec![vec![
                Button::new("✅ approve", CallbackKind::UploadBatchApprove, id),
                Button::new(
                    "🔓 approve + trust",
                    CallbackKind::UploadBatchApproveTrust,
                    id,
                ),
                Button::new("❌ deny", CallbackKind::UploadBatchDeny, id),
            ]],
        ),
        (RequestPayload::AccountAdd { .. }, _) => (
            "🏢 account registration requested",
            vec![vec![
                Button::new("✅ approve", CallbackKind::AccountAddApprove, id),
                Button::new("❌ deny", CallbackKind::AccountAddDeny, id),
            ]],
        ),
        (RequestPayload::AccountRemove { .. }, _) => (
            "🏢 account removal requested",
            vec![vec![
                Button::new("✅ approve", CallbackKind::AccountRemoveApprove, id),
                Button::new("❌ deny", CallbackKind::AccountRemoveDeny, id),
            ]],
        ),
        (RequestPayload::Deploy { .. }, _) => (
            "🚀 deploy requested",
            vec![vec![
                Button::new("✅ approve", CallbackKind::DeployApprove, id),
                Button::new("❌ deny", CallbackKind::DeployDeny, id),
            ]],
        ),
        (RequestPayload::Presigned { .. }, _) => ("📤 presigned url issued", Vec::new()),
    };

    let mut segments = header(record, title);
    match &record.payload {
        RequestPayload::Execute { command, .. } => {
            segments.push(Segment::Plain("📋 command:".to_owned()));
            segments.push(Segment::Break);
            segments.push(command_segment(command));
            segments.push(Segment::Break);
        },
        _ => {
            segments.push(Segment::Plain(format!("📋 {}", record.display_summary)));
            segments.push(Segment::Break);
        },
    }
    if let Some(reason) = dangerous_reason {
        segments.push(Segment::Plain(format!("⚠️ {reason}")));
        segments.push(Segment::Break);
    }
    if let Some(finding) = record
        .compliance_findings
        .iter()
        .max_by_key(|f| f.severity)
    {
        segments.push(Segment::Plain(format!(
            "🧯 compliance {:?}: {}",
            finding.severity, finding.reason
        )));
        segments.push(Segment::Break);
    }
    if let Some(score) = record.risk_score {
        segments.push(Segment::Plain(format!("📊 risk score: {score}")));
        segments.push(Segment::Break);
    }
    segments.push(expiry_line(record.expires_at, now));

    Notification { segments, buttons }
}

/// Per-command lines for a grant bundle message.
#[must_use]
pub fn grant_detail_message(record: &ApprovalRequest, grant: &GrantSession, now: Timestamp) -> Notification {
    let mut base = approval_message(record, None, 0, now);
    let mut extra = Vec::new();
    for detail in &grant.commands_detail {
        let marker = match detail.category {
            GrantCategory::Grantable => "✅",
            GrantCategory::RequiresIndividual => "⚠️",
            GrantCategory::Blocked => "⛔",
        };
        extra.push(Segment::Plain(format!("{marker} ")));
        extra.push(Segment::Code(detail.normalized.clone()));
        if let Some(note) = &detail.note {
            extra.push(Segment::Plain(format!(" ({note})")));
        }
        extra.push(Segment::Break);
    }
    extra.push(Segment::Plain(format!(
        "⏱ ttl {} min, repeats {}",
        grant.ttl_minutes,
        if grant.allow_repeat { "allowed" } else { "single-use" }
    )));
    extra.push(Segment::Break);
    // Insert the command list ahead of the expiry line.
    let expiry = base.segments.pop();
    base.segments.extend(extra);
    if let Some(expiry) = expiry {
        base.segments.push(expiry);
    }
    base
}

/// The one-time edit applied when a record leaves `pending`.
#[must_use]
pub fn resolution_message(record: &ApprovalRequest, paged_notice: Option<&str>) -> Notification {
    let title = match record.status {
        RequestStatus::ExecutedOk => "✅ approved and executed",
        RequestStatus::ExecutedError => "❌ approved, execution failed",
        RequestStatus::Denied => "❌ denied",
        RequestStatus::Expired => "⌛ expired without decision",
        RequestStatus::Approved => "✅ approved",
        _ => "ℹ️ resolved",
    };
    let mut segments = header(record, title);
    if let Some(command) = record.command() {
        segments.push(Segment::Plain("📋 command:".to_owned()));
        segments.push(Segment::Break);
        segments.push(command_segment(command));
        segments.push(Segment::Break);
    } else {
        segments.push(Segment::Plain(format!("📋 {}", record.display_summary)));
        segments.push(Segment::Break);
    }
    if let Some(approver) = &record.approver_id {
        segments.push(Segment::Plain(format!("👤 by {approver}")));
        segments.push(Segment::Break);
    }
    if let Some(result) = &record.result {
        segments.push(Segment::Plain("📤 result:".to_owned()));
        segments.push(Segment::Break);
        segments.push(Segment::CodeBlock(result.clone()));
        if let Some(notice) = paged_notice {
            segments.push(Segment::Plain(notice.to_owned()));
            segments.push(Segment::Break);
        }
    }
    Notification::text_only(segments)
}

/// Silent notification for a safelist auto-execution.
#[must_use]
pub fn auto_approved_message(record: &ApprovalRequest) -> Notification {
    let mut segments = vec![
        Segment::Title("⚡ auto-executed (safelist)".to_owned()),
        Segment::Break,
        Segment::Plain(format!("🤖 source: {}", record.source)),
        Segment::Break,
    ];
    if let Some(command) = record.command() {
        segments.push(command_segment(command));
        segments.push(Segment::Break);
    }
    if let Some(result) = &record.result {
        let preview: String = result.chars().take(300).collect();
        segments.push(Segment::CodeBlock(preview));
    }
    Notification::text_only(segments)
}

/// Silent notification for a trust auto-execution, with a revoke button.
#[must_use]
pub fn trust_executed_message(
    record: &ApprovalRequest,
    session: &TrustSession,
    now: Timestamp,
) -> Notification {
    let mut segments = vec![
        Segment::Title("🔓 trust auto-executed".to_owned()),
        Segment::Break,
        Segment::Plain(format!("🤖 source: {}", record.source)),
        Segment::Break,
    ];
    if let Some(command) = record.command() {
        segments.push(command_segment(command));
        segments.push(Segment::Break);
    }
    let remaining = session.remaining_seconds(now);
    segments.push(Segment::Plain(format!(
        "⏳ {}:{:02} left, command {}/{}",
        remaining / 60,
        remaining % 60,
        session.commands_used,
        session.commands_max
    )));
    Notification {
        segments,
        buttons: vec![vec![Button::new(
            "🛑 end trust",
            CallbackKind::TrustRevoke,
            session.trust_id.as_str(),
        )]],
    }
}

/// Silent notification for a blocked submission.
#[must_use]
pub fn blocked_message(command: &str, reason: &str, source: &str) -> Notification {
    Notification::text_only(vec![
        Segment::Title("⛔ blocked command".to_owned()),
        Segment::Break,
        Segment::Plain(format!("🤖 source: {source}")),
        Segment::Break,
        command_segment(command),
        Segment::Break,
        Segment::Plain(format!("🚫 {reason}")),
    ])
}

/// Silent notification for a presigned-URL issuance.
#[must_use]
pub fn presigned_message(source: &str, keys: &[String], expires_in: u64) -> Notification {
    let mut segments = vec![
        Segment::Title("📤 presigned upload url issued".to_owned()),
        Segment::Break,
        Segment::Plain(format!("🤖 source: {source}")),
        Segment::Break,
        Segment::Plain(format!("⏳ valid {expires_in}s")),
        Segment::Break,
    ];
    for key in keys {
        segments.push(Segment::Code(key.clone()));
        segments.push(Segment::Break);
    }
    Notification::text_only(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncer_approval::RequestPayload;
    use bouncer_core::RequestStatus;

    fn record(command: &str) -> ApprovalRequest {
        ApprovalRequest::new(
            RequestPayload::Execute {
                command: command.to_owned(),
                assume_role: None,
            },
            RequestStatus::Pending,
            "bot *with markup*",
            Some("bot".to_owned()),
            "111111111111",
            "Dev",
            "because",
            300,
            60,
        )
    }

    #[test]
    fn test_standard_buttons() {
        let msg = approval_message(&record("aws ec2 start-instances"), None, 10, Timestamp::now());
        let labels: Vec<&str> = msg.buttons[0].iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels.len(), 3);
        assert!(labels[1].contains("trust 10 min"));
        assert!(msg.buttons[0][0].callback_data.starts_with("cmd_approve:req-"));
    }

    #[test]
    fn test_dangerous_buttons() {
        let msg = approval_message(
            &record("aws ec2 terminate-instances"),
            Some("destructive verb"),
            10,
            Timestamp::now(),
        );
        assert_eq!(msg.buttons[0].len(), 2);
        assert!(msg.buttons[0][0].callback_data.starts_with("dangerous_confirm:"));
        assert!(msg.to_plain_text().contains("destructive verb"));
    }

    #[test]
    fn test_user_text_stays_in_plain_segments() {
        let msg = approval_message(&record("aws s3 cp a b"), None, 10, Timestamp::now());
        // The source string with markup characters must live in a Plain
        // segment (escaped by renderers), never in code segments.
        assert!(msg.segments.iter().any(
            |s| matches!(s, Segment::Plain(text) if text.contains("bot *with markup*"))
        ));
    }

    #[test]
    fn test_long_command_becomes_block() {
        let long = format!("aws s3 cp {} s3://bucket/", "x".repeat(100));
        let msg = approval_message(&record(&long), None, 10, Timestamp::now());
        assert!(msg.segments.iter().any(|s| matches!(s, Segment::CodeBlock(_))));
    }

    #[test]
    fn test_resolution_message_carries_result() {
        let mut r = record("aws s3 ls");
        r.status = RequestStatus::ExecutedOk;
        r.result = Some("2 buckets".to_owned());
        r.approver_id = Some("approver-1".to_owned());
        let msg = resolution_message(&r, Some("(long output, 3 pages)"));
        let text = msg.to_plain_text();
        assert!(text.contains("approved and executed"));
        assert!(text.contains("2 buckets"));
        assert!(text.contains("3 pages"));
        assert!(msg.buttons.is_empty());
    }

    #[test]
    fn test_trust_message_has_revoke_button() {
        let session = TrustSession::new("scope", "acct", "bot", "approver", Default::default());
        let msg = trust_executed_message(&record("aws s3 ls"), &session, Timestamp::now());
        assert_eq!(msg.buttons[0][0].callback_data, format!("trust_revoke:{}", session.trust_id));
    }
}
