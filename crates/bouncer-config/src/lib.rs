//! Bouncer Config - TOML configuration with embedded defaults.
//!
//! Load order: embedded `defaults.toml`, then an optional deployment file
//! overlay, then environment overrides for secrets, then validation. The
//! loaded [`Config`] is immutable for the life of the process.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod loader;
pub mod types;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::load;
pub use types::{
    AccountsSection, ApprovalSection, AuthSection, Config, DeploySection, GrantSection,
    PagingSection, RateSection, RulesSection, TelegramSection, TrustSection, UploadSection,
};
