//! Config discovery and layered loading.
//!
//! 1. Parse the embedded `defaults.toml`.
//! 2. Merge the deployment file, if given.
//! 3. Apply environment overrides for secrets.
//! 4. Validate.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Environment variable overriding `auth.request_secret`.
pub const ENV_REQUEST_SECRET: &str = "BOUNCER_REQUEST_SECRET";
/// Environment variable overriding `auth.callback_secret`.
pub const ENV_CALLBACK_SECRET: &str = "BOUNCER_CALLBACK_SECRET";
/// Environment variable overriding `telegram.bot_token`.
pub const ENV_TELEGRAM_TOKEN: &str = "BOUNCER_TELEGRAM_TOKEN";

/// Load the configuration, overlaying `path` (when given) onto the embedded
/// defaults and applying environment overrides for secrets.
///
/// # Errors
///
/// Returns a [`ConfigError`] when a file is unreadable or malformed, or the
/// merged configuration fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|source| ConfigError::Parse {
            path: "<embedded defaults>".to_owned(),
            source,
        })?;

    if let Some(path) = path {
        let doc = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: toml::Value = toml::from_str(&doc).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded deployment config");
    } else {
        debug!("no deployment config file, using embedded defaults");
    }

    let mut config: Config = merged
        .try_into()
        .map_err(|source| ConfigError::Parse {
            path: "<merged config>".to_owned(),
            source,
        })?;

    apply_env_overrides(&mut config);
    validate::validate(&config)?;
    Ok(config)
}

/// Overlay `overlay` onto `base`, table by table; scalars and arrays replace.
fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    },
                }
            }
        },
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Secrets may come from the environment instead of the file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(secret) = std::env::var(ENV_REQUEST_SECRET)
        && !secret.is_empty()
    {
        config.auth.request_secret = secret;
    }
    if let Ok(secret) = std::env::var(ENV_CALLBACK_SECRET)
        && !secret.is_empty()
    {
        config.auth.callback_secret = secret;
    }
    if let Ok(token) = std::env::var(ENV_TELEGRAM_TOKEN)
        && !token.is_empty()
    {
        config.telegram.bot_token = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(doc: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[auth]
request_secret = "rs"
callback_secret = "cs"
approver_whitelist = ["approver-1"]
"#;

    #[test]
    fn test_load_minimal_file() {
        let file = write_config(MINIMAL);
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.auth.request_secret, "rs");
        // Defaults survive the overlay.
        assert_eq!(config.trust.ttl_minutes, 10);
        assert_eq!(config.paging.page_size_chars, 3500);
    }

    #[test]
    fn test_overlay_replaces_scalars_and_keeps_rest() {
        let file = write_config(&format!("{MINIMAL}\n[trust]\nttl_minutes = 5\n"));
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.trust.ttl_minutes, 5);
        assert_eq!(config.trust.max_commands, 20);
    }

    #[test]
    fn test_missing_secrets_fail_validation() {
        let file = write_config("[auth]\napprover_whitelist = [\"a\"]\n");
        assert!(matches!(
            load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let file = write_config("[auth\n");
        assert!(matches!(load(Some(file.path())), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(matches!(
            load(Some(Path::new("/nonexistent/bouncer.toml"))),
            Err(ConfigError::Read { .. })
        ));
    }
}
