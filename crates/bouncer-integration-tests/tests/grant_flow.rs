//! Grant bundle scenarios: request-time rejection, approve-all /
//! approve-safe, execution matching, budgets, revocation.

use bouncer_core::{GatewayError, RequestStatus};
use bouncer_gateway::CallbackEvent;
use bouncer_integration_tests::{APPROVER, CALLBACK_SECRET, Harness, REQUEST_SECRET, harness};

fn cmds(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

async fn request_grant(h: &Harness, commands: &[&str], allow_repeat: bool) -> bouncer_gateway::GrantRequestOutcome {
    h.bouncer
        .request_grant(
            REQUEST_SECRET,
            &cmds(commands),
            "bulk maintenance",
            "bot-A",
            Some("bot-A".to_owned()),
            None,
            Some(30),
            allow_repeat,
        )
        .await
        .unwrap()
}

async fn decide(h: &Harness, outcome: &bouncer_gateway::GrantRequestOutcome, kind: &str) {
    let event = CallbackEvent {
        token: format!("{kind}:{}", outcome.request_id),
        approver_id: APPROVER.to_owned(),
        callback_id: "cb-grant".to_owned(),
    };
    h.bouncer.handle_callback(CALLBACK_SECRET, event).await.unwrap();
}

#[tokio::test]
async fn bundle_with_blocked_command_rejected_at_request_time() {
    let h = harness();
    let err = h
        .bouncer
        .request_grant(
            REQUEST_SECRET,
            &cmds(&[
                "aws s3 ls s3://x",
                "aws ec2 describe-instances",
                "aws iam delete-user --user-name y",
            ]),
            "cleanup",
            "bot-A",
            None,
            None,
            Some(30),
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Blocked { .. }));
}

#[tokio::test]
async fn approve_all_then_execute_within_budget() {
    let h = harness();
    let outcome = request_grant(&h, &["aws s3 ls s3://x", "aws ec2 describe-instances"], true).await;
    assert_eq!(outcome.grantable, 2);
    decide(&h, &outcome, "grant_approve_all").await;

    let exec = h
        .bouncer
        .grant_execute(
            REQUEST_SECRET,
            &outcome.grant_id,
            "aws s3 ls s3://x",
            "bot-A",
            None,
        )
        .await
        .unwrap();
    assert_eq!(exec.executions_used, 1);
    assert_eq!(exec.result.exit_code, 0);

    // The grant bundle's approval record resolved.
    let record = h
        .bouncer
        .status(REQUEST_SECRET, &outcome.request_id)
        .await
        .unwrap();
    assert_eq!(record.status, RequestStatus::ExecutedOk);

    // Not-in-grant commands refuse with a conflict.
    let err = h
        .bouncer
        .grant_execute(
            REQUEST_SECRET,
            &outcome.grant_id,
            "aws s3 cp secret.txt s3://elsewhere/",
            "bot-A",
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn approve_safe_only_excludes_dangerous_entries() {
    let h = harness();
    let outcome = request_grant(
        &h,
        &["aws s3 ls s3://x", "aws dynamodb delete-table --table-name t"],
        false,
    )
    .await;
    assert_eq!(outcome.grantable, 1);
    assert_eq!(outcome.requires_individual, 1);
    decide(&h, &outcome, "grant_approve_safe").await;

    // The safe entry executes.
    assert!(
        h.bouncer
            .grant_execute(REQUEST_SECRET, &outcome.grant_id, "aws s3 ls s3://x", "bot-A", None)
            .await
            .is_ok()
    );
    // The dangerous entry was not granted.
    let err = h
        .bouncer
        .grant_execute(
            REQUEST_SECRET,
            &outcome.grant_id,
            "aws dynamodb delete-table --table-name t",
            "bot-A",
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn single_use_grant_rejects_repeat() {
    let h = harness();
    let outcome = request_grant(&h, &["aws s3 ls s3://x"], false).await;
    decide(&h, &outcome, "grant_approve_all").await;

    assert!(
        h.bouncer
            .grant_execute(REQUEST_SECRET, &outcome.grant_id, "aws s3 ls s3://x", "bot-A", None)
            .await
            .is_ok()
    );
    let err = h
        .bouncer
        .grant_execute(REQUEST_SECRET, &outcome.grant_id, "aws s3 ls s3://x", "bot-A", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn grant_deny_blocks_execution() {
    let h = harness();
    let outcome = request_grant(&h, &["aws s3 ls s3://x"], false).await;
    decide(&h, &outcome, "grant_deny").await;

    let record = h
        .bouncer
        .status(REQUEST_SECRET, &outcome.request_id)
        .await
        .unwrap();
    assert_eq!(record.status, RequestStatus::Denied);

    let err = h
        .bouncer
        .grant_execute(REQUEST_SECRET, &outcome.grant_id, "aws s3 ls s3://x", "bot-A", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn grant_status_is_source_gated() {
    let h = harness();
    let outcome = request_grant(&h, &["aws s3 ls s3://x"], false).await;
    decide(&h, &outcome, "grant_approve_all").await;

    let view = h
        .bouncer
        .grant_status(REQUEST_SECRET, &outcome.grant_id, "bot-A")
        .await
        .unwrap();
    assert_eq!(view.granted_count, 1);

    let err = h
        .bouncer
        .grant_status(REQUEST_SECRET, &outcome.grant_id, "someone-else")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn revoked_grant_stops_executing() {
    let h = harness();
    let outcome = request_grant(&h, &["aws s3 ls s3://x"], true).await;
    decide(&h, &outcome, "grant_approve_all").await;
    h.bouncer
        .revoke_grant(REQUEST_SECRET, &outcome.grant_id)
        .await
        .unwrap();
    let err = h
        .bouncer
        .grant_execute(REQUEST_SECRET, &outcome.grant_id, "aws s3 ls s3://x", "bot-A", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn pattern_entries_cover_matching_commands() {
    let h = harness();
    let outcome = request_grant(&h, &["aws s3 ls s3://reports/{date}/*"], true).await;
    decide(&h, &outcome, "grant_approve_all").await;

    assert!(
        h.bouncer
            .grant_execute(
                REQUEST_SECRET,
                &outcome.grant_id,
                "aws s3 ls s3://reports/2025-07-01/summary.csv",
                "bot-A",
                None,
            )
            .await
            .is_ok()
    );
    let err = h
        .bouncer
        .grant_execute(
            REQUEST_SECRET,
            &outcome.grant_id,
            "aws s3 ls s3://reports/latest/summary.csv",
            "bot-A",
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
}

#[tokio::test]
async fn unknown_grant_is_404() {
    let h = harness();
    let err = h
        .bouncer
        .grant_execute(
            REQUEST_SECRET,
            &bouncer_core::GrantId::from("grant-bogus"),
            "aws s3 ls",
            "bot-A",
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}
