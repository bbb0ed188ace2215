//! Bouncer Gateway - the composition layer.
//!
//! Everything upstream of this crate is pure data and policy; everything
//! downstream is an injected seam. The gateway wires parser, classifier,
//! compliance, risk, trust, grant, rate limiting, and paging into one
//! admission pipeline; interprets approver callbacks through the webhook
//! dispatcher; and exposes the agent-facing [`Bouncer`] service.
//!
//! The pipeline and the dispatcher both talk to the [`Notifier`],
//! [`CommandExecutor`], and [`Store`](bouncer_approval::Store) traits and
//! never to each other's concrete types.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod accounts;
pub mod callback;
pub mod credentials;
pub mod dispatch;
pub mod executor;
pub mod notify;
pub mod paging;
pub mod pipeline;
pub mod rate;
pub mod service;
pub mod traits;

pub use accounts::{
    Account, AccountStore, MemoryAccountStore, ResolvedAccount, resolve_account,
    validate_account_id, validate_role_arn,
};
pub use callback::{CallbackEvent, CallbackKind, CallbackToken};
pub use credentials::EnvScopedExecutor;
pub use dispatch::WebhookDispatcher;
pub use executor::{ExecReport, ExecutionEngine};
pub use notify::{Button, Notification, Segment};
pub use paging::{PageView, PagedOutput, Pager};
pub use pipeline::{AdmissionDecision, AdmissionPipeline, ExecSummary, Submission};
pub use rate::RateLimiter;
pub use service::{
    Bouncer, BouncerDeps, BuildError, DeployOutcome, GrantExecuteOutcome, GrantRequestOutcome,
    PendingSummary, PresignedGrant, UploadConfirmation, UploadDecision, UploadSubmission,
};
pub use traits::{
    CommandExecutor, CredentialBroker, DeployError, Deployer, ExecError, ExecutionOutcome,
    Invocation, NotifyError, Notifier, ObjectStore, PresignRequest, PresignedUrl, RunningDeploy,
    ScopedCredentials, SignError,
};
