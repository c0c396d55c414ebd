//! Post-processing: deterministic cleanup of extracted text and LLM replies.
//!
//! Three entry points, one per producer:
//!
//! * [`clean_page_text`] for the pdfium text layer
//! * [`clean_ocr_text`] for Tesseract output
//! * [`extract_json_object`] for LLM replies
//!
//! Each rule is a small pure function so it can be tested in isolation.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a page of text-layer output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim_matches('\n').to_string()
}

/// Clean a page of OCR output: collapse runs of spaces, trim every line.
pub fn clean_ocr_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = RE_SPACES.replace_all(&s, " ");
    let s = s
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    collapse_blank_lines(&s).trim_matches('\n').to_string()
}

/// Locate the JSON object in an LLM reply.
///
/// Strips Markdown code fences, then returns the slice from the first `{` to
/// the last `}`. `None` when the reply holds no object at all.
pub fn extract_json_object(reply: &str) -> Option<String> {
    let s = strip_code_fences(reply);
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(s[start..=end].to_string())
}

// ── Rule: Strip outer code fences ────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule: Normalise line endings ─────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule: Trim trailing whitespace per line ──────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule: Collapse excessive blank lines ─────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule: Collapse runs of spaces ────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

// ── Rule: Remove invisible Unicode characters ────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_json() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(input), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_no_lang() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(input), "{\"a\": 1}");
    }

    #[test]
    fn test_no_fences_passthrough() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_object_with_prose() {
        let reply = "Here is the invoice:\n{\"header\": {\"total\": 10}}\nHope it helps!";
        assert_eq!(
            extract_json_object(reply).as_deref(),
            Some("{\"header\": {\"total\": 10}}")
        );
    }

    #[test]
    fn test_extract_json_object_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "RUT\u{200B}: 76.123\u{FEFF}.456-7";
        assert_eq!(remove_invisible_chars(input), "RUT: 76.123.456-7");
    }

    #[test]
    fn test_clean_ocr_text() {
        let input = "  FACTURA    ELECTRONICA  \r\n   N°    4521\n\n\n\n\nTOTAL   $ 1.190.000   ";
        assert_eq!(
            clean_ocr_text(input),
            "FACTURA ELECTRONICA\nN° 4521\n\n\nTOTAL $ 1.190.000"
        );
    }

    #[test]
    fn test_clean_page_text_keeps_inner_spacing() {
        let input = "\nCant.   Descripcion\t\n";
        assert_eq!(clean_page_text(input), "Cant.   Descripcion");
    }
}
