//! Configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Reject configurations the gateway cannot run safely with.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming every problem found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    let mut problems = Vec::new();

    if config.auth.request_secret.is_empty() {
        problems.push("auth.request_secret is required".to_owned());
    }
    if config.auth.callback_secret.is_empty() {
        problems.push("auth.callback_secret is required".to_owned());
    }
    if config.auth.approver_whitelist.is_empty() {
        problems.push("auth.approver_whitelist must name at least one approver".to_owned());
    }
    if config.rate.window_seconds == 0 {
        problems.push("rate.window_seconds must be positive".to_owned());
    }
    if config.rate.max_in_window == 0 {
        problems.push("rate.max_in_window must be positive".to_owned());
    }
    if config.approval.expiry_seconds == 0 {
        problems.push("approval.expiry_seconds must be positive".to_owned());
    }
    if config.approval.long_runner_cap_seconds < config.approval.expiry_seconds {
        problems.push(
            "approval.long_runner_cap_seconds must be >= approval.expiry_seconds".to_owned(),
        );
    }
    if config.paging.page_size_chars == 0 {
        problems.push("paging.page_size_chars must be positive".to_owned());
    }
    if config.trust.max_commands == 0 {
        problems.push("trust.max_commands must be positive".to_owned());
    }
    if config.grant.ttl_max_minutes == 0 || config.grant.ttl_max_minutes > 24 * 60 {
        problems.push("grant.ttl_max_minutes must be in (0, 1440]".to_owned());
    }
    if config.upload.presigned_min_expires > config.upload.presigned_max_expires {
        problems.push("upload.presigned_min_expires exceeds presigned_max_expires".to_owned());
    }
    if config.deploy.enabled && config.deploy.endpoint.is_empty() {
        problems.push("deploy.endpoint is required when deploy.enabled".to_owned());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems.join("; ")))
    }
}
