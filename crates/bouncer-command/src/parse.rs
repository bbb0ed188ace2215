//! Quote-aware argv splitting.
//!
//! Bouncer executes commands through an argv-based executor, never through a
//! shell, so the split here is the one source of truth for word boundaries.
//! The grammar is the POSIX-ish subset CLI tools expect: single quotes are
//! literal, double quotes allow backslash escapes, a bare backslash escapes
//! the next character.

use crate::error::{CommandError, CommandResult};

/// Split a raw command string into argv words.
///
/// # Errors
///
/// Returns [`CommandError::UnbalancedQuote`] for an unterminated quote,
/// [`CommandError::DanglingEscape`] for a trailing backslash, and
/// [`CommandError::Empty`] when no words remain.
pub fn split_argv(raw: &str) -> CommandResult<Vec<String>> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut state = State::Normal;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '\'' => {
                    state = State::Single;
                    in_word = true;
                },
                '"' => {
                    state = State::Double;
                    in_word = true;
                },
                '\\' => {
                    let Some(escaped) = chars.next() else {
                        return Err(CommandError::DanglingEscape);
                    };
                    current.push(escaped);
                    in_word = true;
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                },
                c => {
                    current.push(c);
                    in_word = true;
                },
            },
            State::Single => match c {
                '\'' => state = State::Normal,
                c => current.push(c),
            },
            State::Double => match c {
                '"' => state = State::Normal,
                '\\' => {
                    let Some(escaped) = chars.next() else {
                        return Err(CommandError::UnbalancedQuote);
                    };
                    // Inside double quotes only \" and \\ are escapes; other
                    // backslashes are literal, matching shell behavior.
                    if escaped == '"' || escaped == '\\' {
                        current.push(escaped);
                    } else {
                        current.push('\\');
                        current.push(escaped);
                    }
                },
                c => current.push(c),
            },
        }
    }

    if state != State::Normal {
        return Err(CommandError::UnbalancedQuote);
    }
    if in_word {
        words.push(current);
    }
    if words.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(words)
}

/// Parse a command asserted to start with `program` (e.g. `"aws"`).
///
/// Comparison against the program verb is case-insensitive; the caller is
/// expected to have run [`crate::normalize`] first, which folds it anyway.
///
/// # Errors
///
/// Propagates split errors and returns [`CommandError::UnknownProgram`] when
/// the first word is not the configured verb.
pub fn parse_command(raw: &str, program: &str) -> CommandResult<Vec<String>> {
    let argv = split_argv(raw)?;
    let first = &argv[0];
    if !first.eq_ignore_ascii_case(program) {
        return Err(CommandError::UnknownProgram {
            got: first.clone(),
            expected: program.to_owned(),
        });
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_split() {
        let argv = split_argv("aws s3 ls").unwrap();
        assert_eq!(argv, vec!["aws", "s3", "ls"]);
    }

    #[test]
    fn test_double_quotes_keep_spaces() {
        let argv = split_argv(r#"aws s3 cp "my file.txt" s3://b/"#).unwrap();
        assert_eq!(argv[3], "my file.txt");
    }

    #[test]
    fn test_single_quotes_are_literal() {
        let argv = split_argv(r"aws logs filter-log-events --filter-pattern 'ERROR \n'").unwrap();
        assert_eq!(argv[4], r"ERROR \n");
    }

    #[test]
    fn test_escaped_quote_inside_double() {
        let argv = split_argv(r#"aws x y "say \"hi\"""#).unwrap();
        assert_eq!(argv[3], r#"say "hi""#);
    }

    #[test]
    fn test_json_payload_survives() {
        let argv =
            split_argv(r#"aws lambda invoke --payload '{"key": "value with spaces"}' out.json"#)
                .unwrap();
        assert_eq!(argv[4], r#"{"key": "value with spaces"}"#);
    }

    #[test]
    fn test_unbalanced_quote_rejected() {
        assert!(matches!(
            split_argv("aws s3 ls 'oops"),
            Err(CommandError::UnbalancedQuote)
        ));
        assert!(matches!(
            split_argv(r#"aws s3 ls "oops"#),
            Err(CommandError::UnbalancedQuote)
        ));
    }

    #[test]
    fn test_dangling_escape_rejected() {
        assert!(matches!(
            split_argv("aws s3 ls \\"),
            Err(CommandError::DanglingEscape)
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(split_argv("   "), Err(CommandError::Empty)));
    }

    #[test]
    fn test_program_check() {
        assert!(parse_command("aws s3 ls", "aws").is_ok());
        let err = parse_command("gcloud compute list", "aws").unwrap_err();
        assert!(matches!(err, CommandError::UnknownProgram { .. }));
    }

    #[test]
    fn test_program_check_case_insensitive() {
        assert!(parse_command("AWS s3 ls", "aws").is_ok());
    }
}
