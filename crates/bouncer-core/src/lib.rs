//! Bouncer Core - shared leaf types for the approval gateway.
//!
//! This crate holds the vocabulary every other `bouncer-*` crate speaks:
//! opaque identifiers, timestamps, the request status machine, action kinds,
//! the user-facing error taxonomy, and the single text-escaping helper.
//!
//! Nothing here performs I/O; the types are pure data.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod escape;
pub mod ids;
pub mod kind;
pub mod status;
pub mod time;

pub use error::{GatewayError, GatewayResult};
pub use escape::escape_plain;
pub use ids::{GrantId, MessageId, PageId, RequestId, TrustId};
pub use kind::ActionKind;
pub use status::{DecisionType, RequestStatus};
pub use time::Timestamp;
