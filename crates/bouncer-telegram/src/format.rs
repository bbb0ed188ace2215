//! Notification rendering for Telegram HTML.
//!
//! The escaping rule: `Plain` and `Title` segments pass through
//! [`html_escape`]; `Code` and `CodeBlock` segments land inside
//! `<code>`/`<pre>` entities with only the entity escaping HTML itself
//! requires — markup characters inside code are displayed verbatim.

use bouncer_gateway::{Notification, Segment};

/// Telegram's message length cap, with margin below the wire limit of 4096.
const MAX_MESSAGE_LEN: usize = 4000;

/// Escape text for safe inclusion in Telegram HTML.
#[must_use]
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a gateway notification to Telegram HTML, clamped to the message
/// size limit.
#[must_use]
pub fn render_html(notification: &Notification) -> String {
    let mut out = String::new();
    for segment in &notification.segments {
        match segment {
            Segment::Plain(text) => out.push_str(&html_escape(text)),
            Segment::Title(text) => {
                out.push_str("<b>");
                out.push_str(&html_escape(text));
                out.push_str("</b>");
            },
            Segment::Code(text) => {
                out.push_str("<code>");
                out.push_str(&html_escape(text));
                out.push_str("</code>");
            },
            Segment::CodeBlock(text) => {
                out.push_str("<pre>");
                out.push_str(&html_escape(text));
                out.push_str("</pre>");
            },
            Segment::Break => out.push('\n'),
        }
    }
    clamp_html(&out, MAX_MESSAGE_LEN)
}

/// Largest byte index `<= at` that is a char boundary of `s`.
fn char_floor(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut i = at;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Clamp HTML to `max_len` bytes without splitting a tag or entity, closing
/// any tags the cut left open.
#[must_use]
pub fn clamp_html(html: &str, max_len: usize) -> String {
    if html.len() <= max_len {
        return html.to_owned();
    }
    // Reserve headroom for the closing tags we may have to append.
    let mut boundary = char_floor(html, max_len.saturating_sub(32));
    while boundary > 0 {
        let head = &html.as_bytes()[..boundary];
        let inside_tag = matches!(
            (
                head.iter().rposition(|&b| b == b'<'),
                head.iter().rposition(|&b| b == b'>'),
            ),
            (Some(lt), Some(gt)) if lt > gt
        ) || matches!(
            (
                head.iter().rposition(|&b| b == b'<'),
                head.iter().rposition(|&b| b == b'>'),
            ),
            (Some(_), None)
        );
        let inside_entity = matches!(
            (
                head.iter().rposition(|&b| b == b'&'),
                head.iter().rposition(|&b| b == b';'),
            ),
            (Some(amp), Some(semi)) if amp > semi
        ) || matches!(
            (
                head.iter().rposition(|&b| b == b'&'),
                head.iter().rposition(|&b| b == b';'),
            ),
            (Some(_), None)
        );
        if !inside_tag && !inside_entity {
            break;
        }
        boundary = char_floor(html, boundary.saturating_sub(1));
    }

    close_open_tags(&html[..boundary])
}

/// Append closing tags for any tag still open in a truncated fragment.
fn close_open_tags(html: &str) -> String {
    let mut open: Vec<String> = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        let Some(end_rel) = rest[start..].find('>') else {
            break;
        };
        let tag = &rest[start + 1..start + end_rel];
        rest = &rest[start + end_rel + 1..];
        if let Some(name) = tag.strip_prefix('/') {
            let name = name.to_lowercase();
            if let Some(pos) = open.iter().rposition(|t| *t == name) {
                open.remove(pos);
            }
        } else {
            let name: String = tag
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            if !name.is_empty() {
                open.push(name.to_lowercase());
            }
        }
    }

    let mut out = html.to_owned();
    for tag in open.into_iter().rev() {
        out.push_str("</");
        out.push_str(&tag);
        out.push('>');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncer_gateway::Notification;

    // --- html_escape ---

    #[test]
    fn test_escape_specials() {
        assert_eq!(html_escape("a & <b>"), "a &amp; &lt;b&gt;");
    }

    #[test]
    fn test_escape_plain_passthrough() {
        assert_eq!(html_escape("hello world"), "hello world");
    }

    // --- render_html ---

    #[test]
    fn test_plain_segments_escaped() {
        let n = Notification::text_only(vec![Segment::Plain("<script>".to_owned())]);
        assert_eq!(render_html(&n), "&lt;script&gt;");
    }

    #[test]
    fn test_code_segment_keeps_markup_chars() {
        let n = Notification::text_only(vec![Segment::Code("a *b* _c_".to_owned())]);
        // Markup characters stay verbatim inside code; only HTML entities
        // are transformed.
        assert_eq!(render_html(&n), "<code>a *b* _c_</code>");
    }

    #[test]
    fn test_code_block_entity_escaping() {
        let n = Notification::text_only(vec![Segment::CodeBlock("1 < 2".to_owned())]);
        assert_eq!(render_html(&n), "<pre>1 &lt; 2</pre>");
    }

    #[test]
    fn test_title_bold() {
        let n = Notification::text_only(vec![
            Segment::Title("Approval".to_owned()),
            Segment::Break,
            Segment::Plain("body".to_owned()),
        ]);
        assert_eq!(render_html(&n), "<b>Approval</b>\nbody");
    }

    // --- clamp_html ---

    #[test]
    fn test_clamp_short_untouched() {
        assert_eq!(clamp_html("<b>x</b>", 100), "<b>x</b>");
    }

    #[test]
    fn test_clamp_never_splits_tag() {
        let html = format!("{}<code>abcdef</code>", "x".repeat(90));
        let clamped = clamp_html(&html, 100);
        // No dangling '<' at the cut.
        if let Some(last_lt) = clamped.rfind('<') {
            assert!(clamped[last_lt..].contains('>'), "split inside tag: {clamped}");
        }
    }

    #[test]
    fn test_clamp_never_splits_entity() {
        let html = "&amp;".repeat(100);
        let clamped = clamp_html(&html, 42);
        assert!(!clamped.ends_with('&'));
        assert!(clamped.len() <= 42);
    }

    #[test]
    fn test_clamp_closes_open_tags() {
        let html = format!("<pre>{}</pre>", "y".repeat(200));
        let clamped = clamp_html(&html, 100);
        assert!(clamped.ends_with("</pre>"), "got: {clamped}");
    }

    #[test]
    fn test_close_open_tags_nested() {
        assert_eq!(close_open_tags("<b><i>text"), "<b><i>text</i></b>");
        assert_eq!(close_open_tags("<b>done</b>"), "<b>done</b>");
    }

    #[test]
    fn test_clamp_multibyte_safe() {
        let html = "あ".repeat(2000);
        let clamped = clamp_html(&html, 100);
        assert!(clamped.len() <= 100);
        // Must still be valid UTF-8 (guaranteed by String) and non-empty.
        assert!(!clamped.is_empty());
    }
}
