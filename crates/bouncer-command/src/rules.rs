//! Classifier rule tables.
//!
//! Rules are data: loaded once at startup (built-in defaults or a TOML
//! file), immutable for the life of the process. Changing a rule means a
//! restart.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CommandError, CommandResult};

/// Rule tables consulted by the classifier and the trust-exclusion check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// The CLI program every command must start with.
    pub program: String,
    /// `"{service} {action}"` prefixes (or bare service names) that are
    /// never allowed, no matter who asks.
    pub blocked_prefixes: Vec<String>,
    /// Action-verb prefixes that mark a command as dangerous.
    pub dangerous_verb_prefixes: Vec<String>,
    /// Flags that mark a command as dangerous regardless of verb.
    pub danger_flags: Vec<String>,
    /// Verbs that make `--recursive` dangerous.
    pub recursive_danger_verbs: Vec<String>,
    /// Action-verb prefixes eligible for the safelist.
    pub safelist_verb_prefixes: Vec<String>,
    /// Exact action verbs eligible for the safelist.
    pub safelist_verbs: Vec<String>,
    /// Arguments that veto safelisting even for a read verb.
    pub write_mask_flags: Vec<String>,
    /// Services excluded from trust auto-approval.
    pub trust_excluded_services: Vec<String>,
    /// Action substrings excluded from trust auto-approval.
    pub trust_excluded_actions: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            program: "aws".to_owned(),
            blocked_prefixes: [
                "iam delete-user",
                "iam delete-role",
                "iam delete-policy",
                "iam create-user",
                "iam attach-user-policy",
                "iam attach-role-policy",
                "iam detach-user-policy",
                "iam detach-role-policy",
                "iam put-user-policy",
                "iam put-role-policy",
                "iam update-assume-role-policy",
                "iam create-access-key",
                "iam update-access-key",
                "iam delete-access-key",
                "sts assume-role",
                "sts get-session-token",
                "organizations",
                "ec2 create-key-pair",
                "ec2 import-key-pair",
                "kms create-key",
                "kms schedule-key-deletion",
                "secretsmanager get-secret-value",
            ]
            .map(str::to_owned)
            .to_vec(),
            dangerous_verb_prefixes: ["delete-", "terminate-", "destroy-", "stop-", "force-"]
                .map(str::to_owned)
                .to_vec(),
            danger_flags: [
                "--force",
                "--skip-final-snapshot",
                "--delete-automated-backups",
                "--no-verify-ssl",
            ]
            .map(str::to_owned)
            .to_vec(),
            recursive_danger_verbs: ["rm", "rb", "mv"].map(str::to_owned).to_vec(),
            safelist_verb_prefixes: ["describe-", "list-", "get-", "head-", "batch-get-"]
                .map(str::to_owned)
                .to_vec(),
            safelist_verbs: [
                "ls",
                "scan",
                "query",
                "tail",
                "filter-log-events",
                "lookup-events",
            ]
            .map(str::to_owned)
            .to_vec(),
            write_mask_flags: ["--delete", "--acl", "--force", "--grant-full-control"]
                .map(str::to_owned)
                .to_vec(),
            trust_excluded_services: [
                "iam",
                "sts",
                "organizations",
                "kms",
                "secretsmanager",
                "cloudformation",
                "cloudtrail",
            ]
            .map(str::to_owned)
            .to_vec(),
            trust_excluded_actions: [
                "delete-",
                "terminate-",
                "remove-",
                "destroy-",
                "stop-",
                "disable-",
                "deregister-",
                "modify-instance-attribute",
                "rm",
                "mv",
                "rb",
                "put-bucket-policy",
                "put-bucket-acl",
                "update-function-code",
                "update-function-configuration",
                "update-service",
                "stop-task",
                "modify-db",
                "reboot-db",
                "update-table",
                "change-resource-record-sets",
                "authorize-security-group",
                "revoke-security-group",
                "set-queue-attributes",
                "create-secret",
                "update-secret",
                "put-secret-value",
            ]
            .map(str::to_owned)
            .to_vec(),
        }
    }
}

impl ClassifierRules {
    /// Parse rule tables from a TOML document. Missing keys keep defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::RuleFileParse`] on malformed TOML.
    pub fn from_toml_str(doc: &str) -> CommandResult<Self> {
        Ok(toml::from_str(doc)?)
    }

    /// Load rule tables from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::RuleFileRead`] or
    /// [`CommandError::RuleFileParse`].
    pub fn load_from_file(path: &Path) -> CommandResult<Self> {
        let doc = std::fs::read_to_string(path).map_err(|source| CommandError::RuleFileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&doc)
    }

    /// Whether a normalized command falls outside what a trust session may
    /// auto-approve. Returns the first matching reason.
    ///
    /// `argv` must include the program verb at index 0.
    #[must_use]
    pub fn trust_exclusion_reason(&self, argv: &[String]) -> Option<String> {
        let service = argv.get(1).map(String::as_str).unwrap_or_default();
        if self
            .trust_excluded_services
            .iter()
            .any(|s| s == service)
        {
            return Some(format!("service '{service}' is excluded from trust"));
        }

        let tail = argv.get(1..).unwrap_or_default().join(" ");
        for action in &self.trust_excluded_actions {
            // Verb-shaped entries match the action token; phrases match
            // anywhere in the tail.
            let verb = argv.get(2).map(String::as_str).unwrap_or_default();
            let hit = if action.contains(' ') {
                tail.contains(action.as_str())
            } else if action.ends_with('-') {
                verb.starts_with(action.as_str())
            } else {
                verb == action || tail.contains(action.as_str())
            };
            if hit {
                return Some(format!("action '{action}' is excluded from trust"));
            }
        }

        for flag in &self.danger_flags {
            if argv.iter().any(|a| a == flag) {
                return Some(format!("flag '{flag}' is excluded from trust"));
            }
        }
        if argv.iter().any(|a| a == "--recursive") {
            return Some("flag '--recursive' is excluded from trust".to_owned());
        }
        None
    }

    /// The safelist prefixes, rendered for the `ListSafelist` API.
    #[must_use]
    pub fn safelist_display(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .safelist_verb_prefixes
            .iter()
            .map(|p| format!("{}*", p))
            .collect();
        out.extend(self.safelist_verbs.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split(' ').map(str::to_owned).collect()
    }

    #[test]
    fn test_defaults_contain_identity_mutations() {
        let rules = ClassifierRules::default();
        assert!(
            rules
                .blocked_prefixes
                .iter()
                .any(|p| p == "iam create-user")
        );
        assert!(rules.blocked_prefixes.iter().any(|p| p == "organizations"));
    }

    #[test]
    fn test_toml_overlay_keeps_defaults() {
        let rules = ClassifierRules::from_toml_str("blocked_prefixes = [\"iam\"]").unwrap();
        assert_eq!(rules.blocked_prefixes, vec!["iam"]);
        // Untouched sections keep defaults.
        assert_eq!(rules.program, "aws");
        assert!(!rules.safelist_verb_prefixes.is_empty());
    }

    #[test]
    fn test_trust_exclusion_by_service() {
        let rules = ClassifierRules::default();
        let reason = rules
            .trust_exclusion_reason(&argv("aws iam list-users"))
            .unwrap();
        assert!(reason.contains("iam"));
    }

    #[test]
    fn test_trust_exclusion_by_verb_prefix() {
        let rules = ClassifierRules::default();
        assert!(
            rules
                .trust_exclusion_reason(&argv("aws ec2 delete-vpc --vpc-id v-1"))
                .is_some()
        );
    }

    #[test]
    fn test_trust_exclusion_by_flag() {
        let rules = ClassifierRules::default();
        assert!(
            rules
                .trust_exclusion_reason(&argv("aws s3 cp a s3://b --recursive"))
                .is_some()
        );
    }

    #[test]
    fn test_benign_read_not_excluded() {
        let rules = ClassifierRules::default();
        assert!(
            rules
                .trust_exclusion_reason(&argv("aws ec2 describe-instances"))
                .is_none()
        );
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(ClassifierRules::from_toml_str("blocked_prefixes = {").is_err());
    }
}
