//! Post-processing: normalise the vision model's answer before it is stored.
//!
//! Models occasionally wrap their whole answer in a ```` ```markdown ```` fence,
//! emit CRLF line endings, or sprinkle zero-width characters into the text.
//! These cheap deterministic rules remove that noise without touching
//! content. An answer that is empty after cleanup is not a result; the
//! analyzer reports it as [`crate::error::AnalysisError::EmptyResponse`].
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the fence pattern (which matches on
//! `\n`) also catches CRLF output.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all rules; `None` if nothing but whitespace remains.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip an outer code fence around the whole answer
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines to a single blank line
/// 6. Trim leading/trailing blank space
pub fn clean_result(input: &str) -> Option<String> {
    let s = normalise_line_endings(input);
    let s = strip_outer_fence(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer fence ────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*)\n```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        let input = "```markdown\n# Roast\nToo many buzzwords.\n```";
        assert_eq!(strip_outer_fence(input), "# Roast\nToo many buzzwords.");
    }

    #[test]
    fn test_strip_fences_no_lang() {
        assert_eq!(strip_outer_fence("```\nhello\n```"), "hello");
    }

    #[test]
    fn test_inner_fence_is_kept() {
        let input = "Intro\n```\ncode\n```\nOutro";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn test_crlf_fenced_answer() {
        let cleaned = clean_result("```markdown\r\nRoast: ok\r\n```\r\n").unwrap();
        assert_eq!(cleaned, "Roast: ok");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c"), "abc");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_whitespace_only_is_none() {
        assert_eq!(clean_result("  \n\u{200B}\n  "), None);
        assert_eq!(clean_result("```\n\n```"), None);
    }

    #[test]
    fn test_clean_result_full_pipeline() {
        let raw = "\n\nRoast: ...   \n\n\n\n- Objective statement from 2009\n";
        assert_eq!(
            clean_result(raw).as_deref(),
            Some("Roast: ...\n\n- Objective statement from 2009")
        );
    }
}
