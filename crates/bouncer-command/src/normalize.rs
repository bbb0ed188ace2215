//! Canonical command form.
//!
//! Normalization defeats the easy evasions: NBSP instead of space, zero-width
//! joiners spliced into a verb, `DeScRiBe` casing. It runs before any rule
//! table is consulted and is idempotent.

use unicode_normalization::UnicodeNormalization;

/// Zero-width characters stripped outright.
fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}

/// Normalize a raw command string.
///
/// 1. NFC-normalize.
/// 2. Strip zero-width characters (U+200B/C/D, U+FEFF).
/// 3. Replace every Unicode whitespace character (category `Z*`, NBSP,
///    U+2000..=U+200A, U+202F, U+205F, U+3000, tabs, newlines) with ASCII SP.
/// 4. Collapse SP runs and trim.
/// 5. Lowercase-fold the program verb and the two tokens after it (service
///    and action); later arguments keep their case.
///
/// Pure and idempotent: `normalize(normalize(s)) == normalize(s)`.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let folded: String = raw
        .nfc()
        .filter(|c| !is_zero_width(*c))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();

    let mut out = String::with_capacity(folded.len());
    for (i, token) in folded.split(' ').filter(|t| !t.is_empty()).enumerate() {
        if !out.is_empty() {
            out.push(' ');
        }
        if i < 3 {
            out.push_str(&token.to_lowercase());
        } else {
            out.push_str(token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nbsp_becomes_space() {
        assert_eq!(normalize("aws\u{a0}s3\u{a0}ls"), "aws s3 ls");
    }

    #[test]
    fn test_zero_width_stripped() {
        assert_eq!(normalize("aws s\u{200b}3 l\u{200d}s"), "aws s3 ls");
        assert_eq!(normalize("\u{feff}aws s3 ls"), "aws s3 ls");
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        assert_eq!(normalize("  aws   s3\t\tls  "), "aws s3 ls");
        assert_eq!(normalize("aws\u{2003}s3\u{3000}ls"), "aws s3 ls");
    }

    #[test]
    fn test_case_folds_first_three_tokens_only() {
        assert_eq!(
            normalize("AWS S3 CP s3://Bucket/Key ./Local"),
            "aws s3 cp s3://Bucket/Key ./Local"
        );
    }

    #[test]
    fn test_arguments_keep_case() {
        let n = normalize("aws ec2 describe-instances --instance-ids i-ABC123");
        assert!(n.ends_with("--instance-ids i-ABC123"));
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "aws\u{a0}S3\u{a0}LS",
            "  aws   ec2  Describe-Instances --id X ",
            "aws lambda invoke --payload '{\"A\": 1}'",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \u{200b}  "), "");
    }
}
