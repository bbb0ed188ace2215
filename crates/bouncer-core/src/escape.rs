//! Escaping for user-supplied text placed in chat markup.
//!
//! One rule, applied everywhere: values rendered in plain-text positions go
//! through [`escape_plain`]; values rendered inside code entities are passed
//! through untouched by the message model (the transport adapter may still
//! apply entity escaping required by its wire format, which is not markup
//! escaping).

/// Escape a user-supplied string for a plain-text markup position.
///
/// Escapes the characters Telegram-style markups treat as formatting;
/// harmless elsewhere. Renderers that target HTML re-escape on top of this
/// being a no-op for their special set.
#[must_use]
pub fn escape_plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' => {
                out.push('\\');
                out.push(c);
            },
            _ => out.push(c),
        }
    }
    out
}
