//! Normalizes raw terminal output into plain text for the viewer.

use once_cell::sync::Lazy;
use regex::Regex;

/// OSC (ESC ] ... BEL or ESC \), CSI (ESC [ ... final byte) and two-byte escapes
static ESCAPE_SEQUENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b\[[0-?]*[ -/]*[@-~]|\x1b[()][0-9A-Za-z]|\x1b[@-Z\\-_]",
    )
    .expect("failed to compile escape sequence matcher")
});

static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0b-\x1f\x7f]").expect("failed to compile control char matcher")
});

/// Box drawing, block elements, braille spinners and status bullets
static DECORATIVE_GLYPHS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\u{2500}-\u{259F}\u{2800}-\u{28FF}●○◉◐◑◒◓⏺⎿✻✶✳✢✽]")
        .expect("failed to compile glyph matcher")
});

/// Clean terminal content for display
///
/// Cleaning is idempotent: cleaning already-clean text returns it unchanged.
pub fn clean_content(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n");
    let text = ESCAPE_SEQUENCES.replace_all(&text, "");
    let text = CONTROL_CHARS.replace_all(&text, "");
    let text = DECORATIVE_GLYPHS.replace_all(&text, "");

    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().map_or(false, |line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_color_and_cursor_sequences() {
        let raw = "\x1b[1;32m✔ tests passed\x1b[0m\n\x1b[2K\x1b[1Gnext";
        assert_eq!(clean_content(raw), "✔ tests passed\nnext");
    }

    #[test]
    fn test_strips_osc_titles_and_hyperlinks() {
        let raw = "\x1b]0;claude\x07prompt \x1b]8;;https://x.dev\x1b\\link\x1b]8;;\x1b\\";
        assert_eq!(clean_content(raw), "prompt link");
    }

    #[test]
    fn test_removes_decorative_glyphs() {
        let raw = "╭──────╮\n│ ⏺ Reading files │\n╰──────╯\n⠋ Thinking";
        assert_eq!(clean_content(raw), "\n  Reading files\n\n Thinking");
    }

    #[test]
    fn test_trims_trailing_whitespace_and_blank_lines() {
        let raw = "line one   \r\nline two\t \n\n   \n";
        assert_eq!(clean_content(raw), "line one\nline two");
    }

    #[test]
    fn test_drops_bare_control_characters() {
        assert_eq!(clean_content("a\x07b\x08c\rd"), "abcd");
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let raw = "\x1b[31m● error\x1b[0m   \n\n";
        let once = clean_content(raw);
        assert_eq!(clean_content(&once), once);
    }
}
