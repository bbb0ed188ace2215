//! The gateway's external seams.
//!
//! The chat transport, command executor, credential broker, object store,
//! and deploy orchestrator are external collaborators. The gateway owns
//! their contracts; concrete adapters live elsewhere (`bouncer-telegram`
//! for the notifier) or in the deployment.

use async_trait::async_trait;
use thiserror::Error;

use bouncer_approval::CommitInfo;
use bouncer_core::{MessageId, Timestamp};

use crate::notify::Notification;

/// Notifier transport failure.
#[derive(Debug, Error)]
#[error("notifier error: {0}")]
pub struct NotifyError(pub String);

/// Chat transport for approver-facing messages.
///
/// Implementations render the segment-typed [`Notification`] into their
/// wire markup; the gateway never builds markup strings itself.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post an approval message; returns the handle used for later edits.
    async fn send(&self, message: &Notification) -> Result<MessageId, NotifyError>;

    /// Post an informational message without alerting the approver.
    async fn send_silent(&self, message: &Notification) -> Result<(), NotifyError>;

    /// Replace the content of a previously posted message.
    async fn edit(&self, message_id: &MessageId, message: &Notification)
    -> Result<(), NotifyError>;

    /// Acknowledge a callback with a short toast.
    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), NotifyError>;
}

/// Executor failure (spawn, transport, credential plumbing).
///
/// A command that runs and exits non-zero is NOT an error; that outcome
/// travels in [`ExecutionOutcome::exit_code`].
#[derive(Debug, Error)]
#[error("executor error: {0}")]
pub struct ExecError(pub String);

/// Short-lived credentials scoped to a single executor invocation.
#[derive(Debug, Clone)]
pub struct ScopedCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// When the credentials stop working.
    pub expires_at: Timestamp,
}

/// Issues per-invocation credentials for cross-account execution.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Assume a role and return credentials valid for one invocation.
    async fn assume_role(&self, role_arn: &str) -> Result<ScopedCredentials, ExecError>;
}

/// One validated executor invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The argv to run (program verb first). Never passed through a shell.
    pub argv: Vec<String>,
    /// Credentials for this invocation only; `None` runs with ambient
    /// (local) credentials.
    pub credentials: Option<ScopedCredentials>,
    /// Deadline in seconds.
    pub timeout_seconds: u64,
}

/// What an invocation produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Combined stdout/stderr (stderr wins when stdout is empty).
    pub output: String,
    /// Process exit code.
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Runs a validated command with a supplied credential set.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute one invocation.
    async fn execute(&self, invocation: Invocation) -> Result<ExecutionOutcome, ExecError>;
}

/// Object-store failure.
#[derive(Debug, Error)]
#[error("object store error: {0}")]
pub struct SignError(pub String);

/// A presigned-PUT issuance request.
#[derive(Debug, Clone)]
pub struct PresignRequest {
    /// Target bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Declared content type.
    pub content_type: String,
    /// Server-side enforced (min, max) content length in bytes.
    pub content_length_range: (u64, u64),
    /// URL validity in seconds.
    pub expires_in: u64,
}

/// An issued presigned URL.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    /// The opaque upload URL.
    pub url: String,
    /// When the URL stops working.
    pub expires_at: Timestamp,
}

/// The staging/upload object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issue a presigned PUT URL with a server-side content-length range.
    async fn presign_put(&self, request: &PresignRequest) -> Result<PresignedUrl, SignError>;

    /// Whether an object exists.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool, SignError>;

    /// Promote a staged object into its final location; returns the final
    /// `s3://` URI.
    async fn promote(&self, bucket: &str, key: &str) -> Result<String, SignError>;
}

/// Deploy orchestrator failure.
#[derive(Debug, Error)]
#[error("deployer error: {0}")]
pub struct DeployError(pub String);

/// A deploy currently in flight for a project.
#[derive(Debug, Clone)]
pub struct RunningDeploy {
    /// Orchestrator's deploy id.
    pub deploy_id: String,
    /// When it started.
    pub started_at: Timestamp,
    /// Human-readable remaining-time estimate.
    pub estimated_remaining: String,
}

/// The build-and-deploy orchestrator.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// The deploy currently running for a project, if any.
    async fn running(&self, project_id: &str) -> Result<Option<RunningDeploy>, DeployError>;

    /// Resolve the commit a deploy of `branch` would build.
    async fn resolve_commit(&self, project_id: &str, branch: &str)
    -> Result<CommitInfo, DeployError>;

    /// The template payload a deploy would apply, for compliance scanning.
    async fn template(&self, project_id: &str) -> Result<Option<String>, DeployError>;

    /// Start a deploy; returns the orchestrator's deploy id.
    async fn start(
        &self,
        project_id: &str,
        branch: &str,
        approver: &str,
        reason: &str,
    ) -> Result<String, DeployError>;
}
