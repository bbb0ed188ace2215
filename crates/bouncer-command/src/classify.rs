//! Four-way command classification.
//!
//! Priority order is fixed: blocked, then dangerous, then safelist, then
//! approval. Earlier stage wins; the classifier is deterministic and pure.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rules::ClassifierRules;

/// The classification of a normalized command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "class")]
pub enum Classification {
    /// Never allowed; carries the reason and a remediation hint.
    Blocked {
        /// Which rule matched.
        reason: String,
        /// What the caller should do instead.
        suggestion: String,
    },
    /// Destructive; always requires individual human confirmation.
    Dangerous {
        /// Which rule matched.
        reason: String,
    },
    /// Read-only; eligible for automatic execution.
    Safelist,
    /// Everything else: routed to human approval.
    Approval,
}

impl Classification {
    /// Whether this classification forbids execution outright.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Whether this classification marks the command as destructive.
    #[must_use]
    pub fn is_dangerous(&self) -> bool {
        matches!(self, Self::Dangerous { .. })
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked { reason, .. } => write!(f, "blocked ({reason})"),
            Self::Dangerous { reason } => write!(f, "dangerous ({reason})"),
            Self::Safelist => write!(f, "safelist"),
            Self::Approval => write!(f, "approval"),
        }
    }
}

/// Shell metacharacters that must never appear in argv values.
///
/// Argv is already split, so these can only occur *inside* a value, where
/// they would matter only if some downstream consumer re-joined the command
/// for a shell. Rejecting them here keeps that door closed.
const METACHAR_SUBSTRINGS: [&str; 7] = [";", "|", "`", "$(", "&&", "||", "file://"];

/// The classifier: immutable rule tables plus the decision procedure.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: ClassifierRules,
}

impl Classifier {
    /// Build a classifier over the given rule tables.
    #[must_use]
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    /// Access the underlying rule tables.
    #[must_use]
    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    /// Classify a normalized argv (program verb at index 0).
    #[must_use]
    pub fn classify(&self, argv: &[String]) -> Classification {
        if let Some(reason) = self.blocked_reason(argv) {
            return Classification::Blocked {
                reason,
                suggestion:
                    "this operation is reserved for operators; file a ticket with the platform team"
                        .to_owned(),
            };
        }
        if let Some(reason) = self.dangerous_reason(argv) {
            return Classification::Dangerous { reason };
        }
        if self.is_safelisted(argv) {
            return Classification::Safelist;
        }
        Classification::Approval
    }

    fn blocked_reason(&self, argv: &[String]) -> Option<String> {
        let tail = argv.get(1..).unwrap_or_default().join(" ");
        for prefix in &self.rules.blocked_prefixes {
            if tail.starts_with(prefix.as_str()) {
                return Some(format!("{prefix} is in blocked list"));
            }
        }

        // Values following --query carry JMESPath, which legitimately uses
        // backticks; they are exempt from the metacharacter scan.
        let mut skip_next = false;
        for arg in argv {
            if skip_next {
                skip_next = false;
                continue;
            }
            if arg == "--query" {
                skip_next = true;
                continue;
            }
            for meta in METACHAR_SUBSTRINGS {
                if arg.contains(meta) {
                    return Some(format!("argument contains shell metacharacter '{meta}'"));
                }
            }
            if arg.contains("..") {
                return Some("argument contains path traversal".to_owned());
            }
        }
        None
    }

    fn dangerous_reason(&self, argv: &[String]) -> Option<String> {
        let verb = argv.get(2).map(String::as_str).unwrap_or_default();
        for prefix in &self.rules.dangerous_verb_prefixes {
            if verb.starts_with(prefix.as_str()) {
                return Some(format!("destructive verb '{verb}'"));
            }
        }
        for flag in &self.rules.danger_flags {
            if argv.iter().any(|a| a == flag) {
                return Some(format!("danger flag '{flag}'"));
            }
        }
        if argv.iter().any(|a| a == "--recursive") {
            let destructive = self
                .rules
                .recursive_danger_verbs
                .iter()
                .any(|v| v == verb)
                || self
                    .rules
                    .dangerous_verb_prefixes
                    .iter()
                    .any(|p| verb.starts_with(p.as_str()));
            if destructive {
                return Some(format!("'--recursive' combined with '{verb}'"));
            }
        }
        None
    }

    fn is_safelisted(&self, argv: &[String]) -> bool {
        let verb = argv.get(2).map(String::as_str).unwrap_or_default();
        let read_verb = self
            .rules
            .safelist_verb_prefixes
            .iter()
            .any(|p| verb.starts_with(p.as_str()))
            || self.rules.safelist_verbs.iter().any(|v| v == verb);
        if !read_verb {
            return false;
        }
        !argv
            .iter()
            .any(|a| self.rules.write_mask_flags.iter().any(|m| m == a))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierRules::default())
    }
}
