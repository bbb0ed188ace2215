//! Bouncer Approval - records, sessions, and the store contract.
//!
//! The heart of the gateway's state: the [`ApprovalRequest`] record and its
//! lifecycle, the trust-session and grant-session sub-state-machines that
//! permit bounded auto-approval, and the [`Store`] trait whose conditional
//! updates guarantee at-most-once transitions and never-exceeded budgets.
//!
//! The store is the single authoritative shared resource. Every
//! status-changing write is a compare-and-swap; budget increments happen
//! inside the store, never as a read in application memory followed by a
//! write.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod grant;
pub mod memory;
pub mod pattern;
pub mod record;
pub mod store;
pub mod trust;

pub use error::{ApprovalError, ApprovalResult};
pub use grant::{
    GrantApprovalMode, GrantCategory, GrantCommandDetail, GrantLimits, GrantManager, GrantSession,
    GrantStatus, GrantStatusView,
};
pub use memory::MemoryStore;
pub use pattern::{GrantPattern, entry_matches};
pub use record::{
    ApprovalRequest, CommitInfo, FileSpec, RecordPatch, RequestPayload, display_summary,
};
pub use store::{
    ConsumeOutcome, PageRecord, Store, StoreError, StoreResult, TransitionOutcome, TrustConsume,
};
pub use trust::{TrustBudgets, TrustManager, TrustOutcome, TrustSession, TrustSessionStatus};
