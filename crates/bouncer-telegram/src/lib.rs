//! Bouncer Telegram - the chat transport adapter.
//!
//! Renders the gateway's segment-typed notifications into Telegram HTML,
//! builds inline keyboards from button rows, and implements the gateway
//! [`Notifier`](bouncer_gateway::Notifier) seam over `teloxide`. Callback
//! payloads pass through opaque; the gateway's dispatcher is the only
//! parser.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod format;
pub mod notifier;

pub use error::TelegramNotifierError;
pub use format::{clamp_html, html_escape, render_html};
pub use notifier::TelegramNotifier;
