//! Grant pattern compilation and matching.
//!
//! A grant entry is either an exact normalized command or a pattern with
//! `{placeholder}` and glob wildcards. The compiler carries guards against
//! pathological patterns: a length cap, a wildcard budget, and a ban on
//! consecutive stars, with any engine error treated as a rejection.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use crate::error::{ApprovalError, ApprovalResult};

/// Maximum pattern length.
const PATTERN_MAX_LEN: usize = 256;
/// Maximum `*` count outside placeholders.
const WILDCARD_MAX: usize = 10;

/// Matches `{name}` placeholders with identifier-shaped names.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("invalid regex"));

/// Strips placeholders before counting wildcards.
static ANY_BRACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("invalid regex"));

/// Regex fragment for a named placeholder.
fn placeholder_fragment(name: &str) -> &'static str {
    match name.to_lowercase().as_str() {
        // Hex chars with optional hyphens, 12-36 chars total (UUID-ish).
        "uuid" => r"[0-9a-f][0-9a-f\-]{10,34}[0-9a-f]",
        "date" => r"\d{4}-\d{2}-\d{2}",
        // any / bucket / key / name / unknown: any non-whitespace run.
        _ => r"\S+",
    }
}

/// Convert a literal fragment with glob stars into a regex fragment.
///
/// `**` matches anything including spaces; `*` matches a (possibly empty)
/// non-whitespace run. Everything else is escaped literally.
fn glob_to_regex(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let escaped = regex::escape(text);
    // regex::escape turns * into \*, so ** is \*\*.
    escaped.replace(r"\*\*", ".*").replace(r"\*", r"\S*")
}

/// A compiled grant pattern.
#[derive(Debug, Clone)]
pub struct GrantPattern {
    raw: String,
    regex: Regex,
}

impl GrantPattern {
    /// Whether the string contains pattern syntax at all.
    #[must_use]
    pub fn is_pattern(s: &str) -> bool {
        s.contains('*') || (s.contains('{') && s.contains('}'))
    }

    /// Compile a pattern, enforcing the safety guards.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Pattern`] when the pattern exceeds 256
    /// characters, carries more than 10 wildcards outside placeholders,
    /// contains three consecutive stars, or fails to build.
    pub fn compile(pattern: &str) -> ApprovalResult<Self> {
        if pattern.len() > PATTERN_MAX_LEN {
            return Err(ApprovalError::Pattern(format!(
                "pattern exceeds {PATTERN_MAX_LEN} characters ({})",
                pattern.len()
            )));
        }
        if pattern.contains("***") {
            return Err(ApprovalError::Pattern(
                "pattern contains consecutive wildcards (***)".to_owned(),
            ));
        }
        let without_placeholders = ANY_BRACED.replace_all(pattern, "");
        let wildcard_count = without_placeholders.matches('*').count();
        if wildcard_count > WILDCARD_MAX {
            return Err(ApprovalError::Pattern(format!(
                "pattern contains {wildcard_count} wildcards (limit {WILDCARD_MAX})"
            )));
        }

        let mut fragments = Vec::new();
        let mut last_end = 0;
        for caps in PLACEHOLDER.captures_iter(pattern) {
            let whole = caps.get(0).ok_or_else(|| {
                ApprovalError::Pattern("placeholder capture missing".to_owned())
            })?;
            fragments.push(glob_to_regex(&pattern[last_end..whole.start()]));
            let name = &caps[1];
            fragments.push(format!("(?:{})", placeholder_fragment(name)));
            last_end = whole.end();
        }
        fragments.push(glob_to_regex(&pattern[last_end..]));

        let full = format!("^{}$", fragments.concat());
        let regex = RegexBuilder::new(&full)
            .case_insensitive(true)
            .size_limit(1 << 20)
            .build()
            .map_err(|e| ApprovalError::Pattern(format!("pattern failed to compile: {e}")))?;
        Ok(Self {
            raw: pattern.to_owned(),
            regex,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether a normalized command matches this pattern in full.
    #[must_use]
    pub fn matches(&self, normalized_cmd: &str) -> bool {
        self.regex.is_match(normalized_cmd)
    }
}

/// Whether a granted entry (exact string or pattern) covers a normalized
/// command. Pattern compile failures are treated as non-matches.
#[must_use]
pub fn entry_matches(entry: &str, normalized_cmd: &str) -> bool {
    if !GrantPattern::is_pattern(entry) {
        return entry == normalized_cmd;
    }
    match GrantPattern::compile(entry) {
        Ok(pattern) => pattern.matches(normalized_cmd),
        Err(e) => {
            tracing::warn!(entry, error = %e, "unmatchable grant pattern");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    #[test]
    fn test_length_guard() {
        let long = "a".repeat(257);
        assert!(GrantPattern::compile(&long).is_err());
        let ok = "a".repeat(256);
        assert!(GrantPattern::compile(&ok).is_ok());
    }

    #[test]
    fn test_wildcard_budget() {
        let eleven = format!("aws s3 cp {}", "*x".repeat(11));
        assert!(GrantPattern::compile(&eleven).is_err());
        let ten = format!("aws s3 cp {}", "*x".repeat(10));
        assert!(GrantPattern::compile(&ten).is_ok());
    }

    #[test]
    fn test_wildcards_inside_placeholders_not_counted() {
        // The braces are stripped before counting.
        let p = "aws s3 cp {key} s3://b/*".to_owned();
        assert!(GrantPattern::compile(&p).is_ok());
    }

    #[test]
    fn test_triple_star_rejected() {
        assert!(GrantPattern::compile("aws s3 ls s3://b/***").is_err());
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    #[test]
    fn test_exact_entry_matches_itself() {
        assert!(entry_matches("aws s3 ls s3://x", "aws s3 ls s3://x"));
        assert!(!entry_matches("aws s3 ls s3://x", "aws s3 ls s3://y"));
    }

    #[test]
    fn test_single_star_stays_in_word() {
        let p = GrantPattern::compile("aws s3 ls s3://bucket/*").unwrap();
        assert!(p.matches("aws s3 ls s3://bucket/deep/key"));
        assert!(!p.matches("aws s3 ls s3://bucket/key extra-arg"));
    }

    #[test]
    fn test_double_star_crosses_spaces() {
        let p = GrantPattern::compile("aws s3 cp ** s3://dest/*").unwrap();
        assert!(p.matches("aws s3 cp a b s3://dest/x"));
    }

    #[test]
    fn test_uuid_placeholder() {
        let p = GrantPattern::compile("aws s3 cp s3://up/{uuid}/out.html s3://site/out.html")
            .unwrap();
        assert!(p.matches("aws s3 cp s3://up/123e4567-e89b-12d3-a456-426614174000/out.html s3://site/out.html"));
        assert!(!p.matches("aws s3 cp s3://up/not a uuid/out.html s3://site/out.html"));
    }

    #[test]
    fn test_date_placeholder() {
        let p = GrantPattern::compile("aws logs tail /app/{date}").unwrap();
        assert!(p.matches("aws logs tail /app/2025-03-01"));
        assert!(!p.matches("aws logs tail /app/march"));
    }

    #[test]
    fn test_unknown_placeholder_is_nonspace() {
        let p = GrantPattern::compile("aws s3 ls s3://{bucket}").unwrap();
        assert!(p.matches("aws s3 ls s3://my-bucket"));
        assert!(!p.matches("aws s3 ls s3://two words"));
    }

    #[test]
    fn test_full_string_anchoring() {
        let p = GrantPattern::compile("aws s3 ls").unwrap();
        assert!(!p.matches("aws s3 ls s3://b"));
        assert!(!p.matches("x aws s3 ls"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = GrantPattern::compile("aws logs tail /a+b(c)").unwrap();
        assert!(p.matches("aws logs tail /a+b(c)"));
        assert!(!p.matches("aws logs tail /aab(c)"));
    }

    #[test]
    fn test_is_pattern_detection() {
        assert!(GrantPattern::is_pattern("aws s3 ls *"));
        assert!(GrantPattern::is_pattern("aws {any}"));
        assert!(!GrantPattern::is_pattern("aws s3 ls"));
        assert!(!GrantPattern::is_pattern("aws { not-a-placeholder"));
    }
}
