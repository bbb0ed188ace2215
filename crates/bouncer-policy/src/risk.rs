//! Weighted risk scoring.
//!
//! Each matching rule adds its weight; the sum clamps to [0, 100]. The
//! score rides along as metadata and gates the grant pre-check; it never
//! bypasses the compliance checker. A scorer that cannot run reports 100.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PolicyError, PolicyResult};

/// One scoring rule as written in the rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RiskRuleSpec {
    id: String,
    category: String,
    pattern: String,
    weight: u32,
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RiskRuleFile {
    #[serde(default)]
    version: String,
    #[serde(default, rename = "rule")]
    rules: Vec<RiskRuleSpec>,
}

#[derive(Debug)]
struct CompiledRiskRule {
    spec: RiskRuleSpec,
    regex: Regex,
}

/// The outcome of scoring one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// Total score, clamped to [0, 100].
    pub score: u8,
    /// Reasons for each rule hit, in table order.
    pub hits: Vec<String>,
    /// Summed weight per category.
    pub category_breakdown: BTreeMap<String, u32>,
}

impl RiskReport {
    /// The fail-closed report: maximum score, engine-failure reason.
    #[must_use]
    pub fn fail_closed(detail: &str) -> Self {
        Self {
            score: 100,
            hits: vec![format!("risk evaluation failed: {detail}")],
            category_breakdown: BTreeMap::new(),
        }
    }
}

/// The risk scorer: an immutable compiled ruleset.
#[derive(Debug)]
pub struct RiskScorer {
    rules: Vec<CompiledRiskRule>,
    version: String,
}

/// Embedded default ruleset.
const DEFAULT_RULES: &str = include_str!("../rules/risk.toml");

impl RiskScorer {
    /// Parse and compile a ruleset from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::RuleFileParse`] on malformed TOML and
    /// [`PolicyError::InvalidPattern`] for an unbuildable pattern.
    pub fn from_toml_str(doc: &str) -> PolicyResult<Self> {
        let file: RiskRuleFile = toml::from_str(doc)?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for spec in file.rules {
            let regex = RegexBuilder::new(&spec.pattern)
                .case_insensitive(true)
                .size_limit(1 << 20)
                .build()
                .map_err(|e| PolicyError::InvalidPattern {
                    rule_id: spec.id.clone(),
                    message: e.to_string(),
                })?;
            rules.push(CompiledRiskRule { spec, regex });
        }
        Ok(Self {
            rules,
            version: file.version,
        })
    }

    /// Load a ruleset from a file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::RuleFileRead`] or the parse errors of
    /// [`Self::from_toml_str`].
    pub fn load_from_file(path: &Path) -> PolicyResult<Self> {
        let doc = std::fs::read_to_string(path).map_err(|source| PolicyError::RuleFileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&doc)
    }

    /// The rule file's version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Score a normalized command.
    #[must_use]
    pub fn score(&self, command: &str) -> RiskReport {
        // Pad so verb rules anchored on whitespace also match at the edges.
        let padded = format!(" {command} ");
        let mut total: u32 = 0;
        let mut hits = Vec::new();
        let mut breakdown: BTreeMap<String, u32> = BTreeMap::new();
        for rule in &self.rules {
            if rule.regex.is_match(&padded) {
                total = total.saturating_add(rule.spec.weight);
                hits.push(rule.spec.reason.clone());
                *breakdown.entry(rule.spec.category.clone()).or_default() += rule.spec.weight;
            }
        }
        RiskReport {
            score: u8::try_from(total.min(100)).unwrap_or(100),
            hits,
            category_breakdown: breakdown,
        }
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::from_toml_str(DEFAULT_RULES).expect("embedded risk rules are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readonly_command_scores_low() {
        let scorer = RiskScorer::default();
        let report = scorer.score("aws s3 ls");
        assert!(report.score < 20, "score was {}", report.score);
    }

    #[test]
    fn test_destructive_identity_command_scores_high() {
        let scorer = RiskScorer::default();
        let report = scorer.score("aws iam delete-role --role-name admin --force");
        assert!(report.score >= 66, "score was {}", report.score);
        assert!(!report.hits.is_empty());
    }

    #[test]
    fn test_score_clamps_at_100() {
        let scorer = RiskScorer::default();
        let report = scorer.score(
            "aws iam delete-user --force --recursive arn:* prod public-read 0.0.0.0/0 terminate stop",
        );
        assert!(report.score <= 100);
    }

    #[test]
    fn test_category_breakdown_sums_weights() {
        let scorer = RiskScorer::default();
        let report = scorer.score("aws ec2 terminate-instances --instance-ids i-1 --force");
        let total: u32 = report.category_breakdown.values().sum();
        assert!(total >= u32::from(report.score));
    }

    #[test]
    fn test_fail_closed_is_100() {
        let report = RiskReport::fail_closed("ruleset unavailable");
        assert_eq!(report.score, 100);
        assert_eq!(report.hits.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_rejected_at_load() {
        let doc = r#"
[[rule]]
id = "bad"
category = "x"
pattern = '(oops'
weight = 10
reason = "broken"
"#;
        assert!(matches!(
            RiskScorer::from_toml_str(doc),
            Err(PolicyError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_empty_ruleset_scores_zero() {
        let scorer = RiskScorer::from_toml_str("").unwrap();
        assert_eq!(scorer.score("aws iam delete-user").score, 0);
    }
}
