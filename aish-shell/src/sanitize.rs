//! Strip terminal control sequences from pty output.
//!
//! The relayed copy of a session's output is meant for a reader that is not a
//! terminal, so colours, cursor movement and window titles are removed.

use regex::Regex;
use std::sync::LazyLock;

/// CSI parameter sequences through their final byte, and OSC sequences
/// through `BEL`, introduced by `ESC` or the C1 CSI.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x1b\x{9b}][\[\]()#;?]*(?:(?:(?:[a-zA-Z0-9]*(?:;[a-zA-Z0-9]*)*)?\x07)|(?:(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-PRZcf-ntqry=><~]))",
    )
    .expect("valid regex")
});

/// Remove escape sequences, then every non-printable character except `\n`
/// and `\t`. Invalid UTF-8 is replaced with `U+FFFD`.
pub fn sanitize(input: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(input);
    let stripped = ANSI_ESCAPE.replace_all(&text, "");
    stripped
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || is_printable(c))
        .collect::<String>()
        .into_bytes()
}

/// Letters, marks, numbers, punctuation, symbols and the ASCII space.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !c.is_control() && !c.is_whitespace() && !is_format_or_private(c)
}

fn is_format_or_private(c: char) -> bool {
    matches!(
        c,
        '\u{ad}'
            | '\u{600}'..='\u{605}'
            | '\u{61c}'
            | '\u{6dd}'
            | '\u{70f}'
            | '\u{890}'..='\u{891}'
            | '\u{8e2}'
            | '\u{180e}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206f}'
            | '\u{e000}'..='\u{f8ff}'
            | '\u{feff}'
            | '\u{fff9}'..='\u{fffb}'
            | '\u{110bd}'
            | '\u{110cd}'
            | '\u{13430}'..='\u{1343f}'
            | '\u{1bca0}'..='\u{1bca3}'
            | '\u{1d173}'..='\u{1d17a}'
            | '\u{e0001}'
            | '\u{e0020}'..='\u{e007f}'
            | '\u{f0000}'..='\u{ffffd}'
            | '\u{100000}'..='\u{10fffd}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn s(input: &str) -> String {
        String::from_utf8(sanitize(input.as_bytes())).unwrap()
    }

    #[test]
    fn test_strips_colours() {
        assert_eq!(s("\x1b[31mHello\x1b[0m\tWorld\n"), "Hello\tWorld\n");
    }

    #[test]
    fn test_strips_window_title() {
        assert_eq!(s("\x1b]0;user@host: ~\x07$ ls\n"), "$ ls\n");
    }

    #[test]
    fn test_strips_cursor_movement_and_modes() {
        assert_eq!(s("\x1b[2J\x1b[H\x1b[?25lready\x1b[?25h"), "ready");
        assert_eq!(s("\x1b[1;32mok\x1b[K"), "ok");
    }

    #[test]
    fn test_strips_c1_csi() {
        assert_eq!(s("\u{9b}1mbold"), "bold");
    }

    #[test]
    fn test_drops_carriage_returns_and_bells() {
        assert_eq!(s("hi\r\n\x07"), "hi\n");
    }

    #[test]
    fn test_drops_zero_width_characters() {
        assert_eq!(s("a\u{200b}b\u{feff}"), "ab");
    }

    #[test]
    fn test_drops_tags_and_supplementary_private_use() {
        assert_eq!(s("a\u{e0001}\u{e0041}\u{f0000}\u{10fffd}b"), "ab");
    }

    #[test]
    fn test_sequence_parameters_are_ascii_digits() {
        // Arabic-Indic digit one does not continue a CSI sequence.
        assert_eq!(s("\x1b[\u{661}m"), "[\u{661}m");
        assert_eq!(s("\x1b[12;34Hx"), "x");
    }

    #[test]
    fn test_keeps_unicode_text() {
        assert_eq!(s("café ✓ 日本\n"), "café ✓ 日本\n");
    }

    #[test]
    fn test_invalid_utf8_becomes_replacement() {
        assert_eq!(sanitize(b"a\xffb"), "a\u{fffd}b".as_bytes());
    }

    #[test]
    fn test_empty_input() {
        assert!(sanitize(b"").is_empty());
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(input in proptest::collection::vec(any::<u8>(), 0..256)) {
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn sanitize_keeps_printable_ascii(input in "[ -~\n\t]{0,256}") {
            prop_assert_eq!(sanitize(input.as_bytes()), input.into_bytes());
        }

        #[test]
        fn sanitize_output_has_no_controls(input in "\\PC{0,64}|[\\x00-\\x1f\\x1b\\[0-9;m]{0,64}") {
            let out = String::from_utf8(sanitize(input.as_bytes())).unwrap();
            prop_assert!(out.chars().all(|c| c == '\n' || c == '\t' || !c.is_control()));
        }
    }
}
