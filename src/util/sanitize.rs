use std::borrow::Cow;

/// Strips C0 control characters (except tab, newline and carriage return),
/// DEL, and ANSI escape sequences from feed-supplied text.
///
/// Feed documents are attacker-controlled; escape sequences in a title would
/// otherwise end up in the database and on whatever terminal prints it.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .chars()
        .any(|c| c == '\u{1b}' || c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r')));

    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => {
                // CSI: ESC [ params final-byte
                if chars.peek() == Some(&'[') {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
            }
            '\t' | '\n' | '\r' => out.push(c),
            c if c < ' ' || c == '\u{7f}' => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

/// Trims and sanitizes a text node collected from a feed.
pub fn clean_text(raw: &str) -> String {
    strip_control_chars(raw.trim()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_borrowed() {
        let input = "Hello, world";
        assert!(matches!(strip_control_chars(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strips_csi_sequence() {
        assert_eq!(strip_control_chars("Evil\x1b[31m Feed"), "Evil Feed");
    }

    #[test]
    fn test_strips_bell_and_del() {
        assert_eq!(strip_control_chars("About\x07 things\x7f"), "About things");
    }

    #[test]
    fn test_keeps_whitespace_controls() {
        assert_eq!(strip_control_chars("a\tb\nc\r"), "a\tb\nc\r");
    }

    #[test]
    fn test_clean_text_trims() {
        assert_eq!(clean_text("\n   /Film \n"), "/Film");
    }

    #[test]
    fn test_multibyte_preserved() {
        assert_eq!(strip_control_chars("Caf\u{e9}\x1b[0m \u{4e16}\u{754c}"), "Caf\u{e9} \u{4e16}\u{754c}");
    }
}
