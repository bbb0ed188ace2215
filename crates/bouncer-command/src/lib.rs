//! Bouncer Command - parsing, normalization, and classification.
//!
//! The front of the admission pipeline: a raw command string is split into
//! argv ([`parse`]), folded into canonical form ([`normalize`]), and mapped
//! to exactly one of four classes ([`classify`]). All three stages are pure
//! functions over immutable rule tables; nothing here touches the store or
//! the network.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod classify;
pub mod error;
pub mod normalize;
pub mod parse;
pub mod rules;

pub use classify::{Classification, Classifier};
pub use error::{CommandError, CommandResult};
pub use normalize::normalize;
pub use parse::{parse_command, split_argv};
pub use rules::ClassifierRules;
