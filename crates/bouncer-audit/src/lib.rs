//! Bouncer Audit - append-only decision trail.
//!
//! Every admission decision and every callback resolution produces one
//! [`AuditEntry`]. Entries are write-only from the gateway's perspective;
//! an audit failure is logged and swallowed, never allowed to change a
//! decision.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entry;
pub mod log;

pub use entry::{AuditEntry, TtlClass};
pub use log::{AuditLog, AuditSink, MemorySink, TracingSink};
