//! Upload and presigned-URL scenarios, plus the deploy front-end.

use bouncer_core::{GatewayError, RequestStatus};
use bouncer_gateway::{CallbackEvent, DeployOutcome, UploadDecision, UploadSubmission};
use bouncer_integration_tests::{APPROVER, CALLBACK_SECRET, REQUEST_SECRET, harness, harness_with};

fn upload(filename: &str) -> UploadSubmission {
    UploadSubmission {
        filename: filename.to_owned(),
        content_type: "text/html".to_owned(),
        size_bytes: 2048,
        s3_key: Some(format!("uploads/2025-07-01/abc/{filename}")),
        reason: "publish report".to_owned(),
        source: "bot-A".to_owned(),
        trust_scope: "bot-A".to_owned(),
        account_id: None,
    }
}

#[tokio::test]
async fn upload_without_trust_goes_pending_then_promotes_on_approval() {
    let h = harness();
    let decision = h
        .bouncer
        .submit_upload(REQUEST_SECRET, upload("report.html"))
        .await
        .unwrap();
    let UploadDecision::Pending { request_id, .. } = decision else {
        panic!("expected pending upload, got {decision:?}");
    };

    let event = CallbackEvent {
        token: format!("upload_approve:{request_id}"),
        approver_id: APPROVER.to_owned(),
        callback_id: "cb-up".to_owned(),
    };
    h.bouncer.handle_callback(CALLBACK_SECRET, event).await.unwrap();

    let record = h.bouncer.status(REQUEST_SECRET, &request_id).await.unwrap();
    assert_eq!(record.status, RequestStatus::ExecutedOk);
    let promoted = h.object_store.promoted().await;
    assert_eq!(promoted.len(), 1);
    assert!(promoted[0].contains("report.html"));
}

#[tokio::test]
async fn upload_denied_promotes_nothing() {
    let h = harness();
    let UploadDecision::Pending { request_id, .. } = h
        .bouncer
        .submit_upload(REQUEST_SECRET, upload("report.html"))
        .await
        .unwrap()
    else {
        panic!("expected pending");
    };
    let event = CallbackEvent {
        token: format!("upload_deny:{request_id}"),
        approver_id: APPROVER.to_owned(),
        callback_id: "cb-up".to_owned(),
    };
    h.bouncer.handle_callback(CALLBACK_SECRET, event).await.unwrap();

    let record = h.bouncer.status(REQUEST_SECRET, &request_id).await.unwrap();
    assert_eq!(record.status, RequestStatus::Denied);
    assert!(h.object_store.promoted().await.is_empty());
}

#[tokio::test]
async fn unsafe_filenames_rejected() {
    let h = harness();
    for bad in ["../escape.html", "nested/path.html", "tool.exe", ""] {
        let err = h
            .bouncer
            .submit_upload(REQUEST_SECRET, upload(bad))
            .await
            .unwrap_err();
        assert!(
            matches!(err, GatewayError::Parse(_)),
            "filename {bad:?} must be rejected"
        );
    }
}

#[tokio::test]
async fn upload_approve_trust_enables_trusted_uploads() {
    let h = harness();
    let UploadDecision::Pending { request_id, .. } = h
        .bouncer
        .submit_upload(REQUEST_SECRET, upload("first.html"))
        .await
        .unwrap()
    else {
        panic!("expected pending");
    };
    let event = CallbackEvent {
        token: format!("upload_approve_trust:{request_id}"),
        approver_id: APPROVER.to_owned(),
        callback_id: "cb-up".to_owned(),
    };
    h.bouncer.handle_callback(CALLBACK_SECRET, event).await.unwrap();

    // The next upload from the same scope rides the session.
    let decision = h
        .bouncer
        .submit_upload(REQUEST_SECRET, upload("second.html"))
        .await
        .unwrap();
    let UploadDecision::TrustAutoApproved { uris, .. } = decision else {
        panic!("expected trusted upload, got {decision:?}");
    };
    assert_eq!(uris.len(), 1);

    let session = h
        .bouncer
        .trust_status(REQUEST_SECRET, "bot-A", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.uploads_used, 1);
    assert_eq!(session.bytes_used, 2048);
}

#[tokio::test]
async fn presigned_url_issuance_is_auditable_and_silent() {
    let h = harness();
    let grant = h
        .bouncer
        .request_presigned(
            REQUEST_SECRET,
            "data.csv",
            "text/csv",
            "stage a dataset",
            "bot-A",
            300,
        )
        .await
        .unwrap();
    assert!(grant.presigned_url.starts_with("https://signed.example/"));
    assert!(grant.s3_uri.starts_with("s3://uploads-staging/"));
    assert!(grant.s3_key.ends_with("data.csv"));
    // A silent notification went out; no approval message.
    assert_eq!(h.notifier.sent_count().await, 0);
    assert_eq!(h.notifier.silent_messages().await.len(), 1);
}

#[tokio::test]
async fn presigned_expiry_bounds_enforced() {
    let h = harness();
    for bad in [0u64, 59, 3601] {
        let err = h
            .bouncer
            .request_presigned(REQUEST_SECRET, "x.csv", "text/csv", "r", "bot-A", bad)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)), "expiry {bad} must fail");
    }
}

#[tokio::test]
async fn presigned_batch_shares_one_prefix_and_confirms() {
    let h = harness();
    let files = vec![
        ("a.csv".to_owned(), "text/csv".to_owned()),
        ("b.csv".to_owned(), "text/csv".to_owned()),
    ];
    let grants = h
        .bouncer
        .request_presigned_batch(REQUEST_SECRET, &files, "stage", "bot-A", 600)
        .await
        .unwrap();
    assert_eq!(grants.len(), 2);
    let batch_id = grants[0].batch_id.clone().unwrap();
    assert!(grants.iter().all(|g| g.s3_key.contains(&batch_id)));

    // Only one of the two files actually arrives.
    h.object_store.stage(&grants[0].s3_key).await;
    let keys: Vec<String> = grants.iter().map(|g| g.s3_key.clone()).collect();
    let confirmation = h
        .bouncer
        .confirm_upload(REQUEST_SECRET, &batch_id, &keys)
        .await
        .unwrap();
    assert!(!confirmation.verified);
    assert_eq!(confirmation.missing, vec![grants[1].s3_key.clone()]);

    // After the second file lands, verification passes.
    h.object_store.stage(&grants[1].s3_key).await;
    let confirmation = h
        .bouncer
        .confirm_upload(REQUEST_SECRET, &batch_id, &keys)
        .await
        .unwrap();
    assert!(confirmation.verified);
    assert!(confirmation.missing.is_empty());
}

#[tokio::test]
async fn deploy_disabled_by_default() {
    let h = harness();
    let err = h
        .bouncer
        .deploy(REQUEST_SECRET, "widget-api", "ship it", "bot-A", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn deploy_pending_carries_commit_info() {
    let h = harness_with(|config| {
        config.deploy.enabled = true;
        config.deploy.endpoint = "https://deployer.internal".to_owned();
    });
    let outcome = h
        .bouncer
        .deploy(REQUEST_SECRET, "widget-api", "ship it", "bot-A", Some("main"))
        .await
        .unwrap();
    let DeployOutcome::Pending { request_id, commit_short, .. } = outcome else {
        panic!("expected pending deploy, got {outcome:?}");
    };
    assert_eq!(commit_short, "0123456");

    // Approval starts the deploy.
    let event = CallbackEvent {
        token: format!("deploy_approve:{request_id}"),
        approver_id: APPROVER.to_owned(),
        callback_id: "cb-dep".to_owned(),
    };
    h.bouncer.handle_callback(CALLBACK_SECRET, event).await.unwrap();
    assert_eq!(h.deployer.started().await, vec!["widget-api".to_owned()]);
    let record = h.bouncer.status(REQUEST_SECRET, &request_id).await.unwrap();
    assert_eq!(record.status, RequestStatus::ExecutedOk);
}

#[tokio::test]
async fn deploy_conflict_reports_running_instance() {
    let h = harness_with(|config| {
        config.deploy.enabled = true;
        config.deploy.endpoint = "https://deployer.internal".to_owned();
    });
    h.deployer.set_running("deploy-42").await;
    let outcome = h
        .bouncer
        .deploy(REQUEST_SECRET, "widget-api", "ship it", "bot-A", None)
        .await
        .unwrap();
    let DeployOutcome::Conflict {
        running_deploy_id,
        started_at,
        estimated_remaining,
    } = outcome
    else {
        panic!("expected conflict, got {outcome:?}");
    };
    assert_eq!(running_deploy_id, "deploy-42");
    assert!(started_at.contains('T'), "ISO-8601 expected: {started_at}");
    assert!(!estimated_remaining.is_empty());
}

#[tokio::test]
async fn deploy_template_critical_rejects() {
    let h = harness_with(|config| {
        config.deploy.enabled = true;
        config.deploy.endpoint = "https://deployer.internal".to_owned();
    });
    h.deployer
        .set_template(
            r#"{"PostInstall": "aws lambda add-permission --function-name f --principal '*'"}"#,
        )
        .await;
    let err = h
        .bouncer
        .deploy(REQUEST_SECRET, "widget-api", "ship it", "bot-A", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ComplianceRejected { .. }));
}
