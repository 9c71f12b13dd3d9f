//! Markdown cleanup for converted documents.
//!
//! Markdown produced by an external PDF converter carries debris: page
//! furniture, stray symbols and repeated running headers. `clean_markdown`
//! removes it line by line while keeping `<!-- Page N -->` markers so chunk
//! text can still be traced back to a page. Every other line is kept as is.

use regex::Regex;
use std::sync::LazyLock;

/// A page marker comment; markers without a number are dropped.
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<!--\s*Page\s*(\d+)?").expect("valid page marker regex"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\-\*•]\.?$").expect("valid list marker regex"));

const MAX_CONSECUTIVE_BLANK: usize = 2;

/// Clean one line. `None` drops it, `Some("")` is a blank separator.
fn clean_line(line: &str) -> Option<&str> {
    let stripped = line.trim();
    if stripped.is_empty() {
        return Some("");
    }

    let len = stripped.chars().count();
    if len < 2 {
        return None;
    }

    // Only punctuation or symbols
    if !stripped.chars().any(char::is_alphanumeric) {
        return None;
    }

    // Isolated fragments, unless they are list or numbering markers
    if len <= 3 && !LIST_MARKER.is_match(stripped) {
        return None;
    }

    Some(stripped)
}

/// Clean converted markdown.
///
/// - keeps page markers, normalized to `<!-- Page N -->` plus a blank line;
///   a marker with no page number is dropped
/// - drops lines shorter than two characters, symbol-only lines and
///   fragments of three characters or fewer (list markers like `1.` survive)
/// - drops a line identical to the one before it
/// - allows at most two blank lines in a row and trims blank lines at both ends
pub fn clean_markdown(content: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut consecutive_blank = 0;

    for line in content.lines() {
        if let Some(caps) = PAGE_MARKER.captures(line.trim_start()) {
            if let Some(page) = caps.get(1) {
                lines.push(format!("<!-- Page {} -->", page.as_str()));
                lines.push(String::new());
                consecutive_blank = 1;
            }
            continue;
        }

        let Some(cleaned) = clean_line(line) else {
            continue;
        };

        let previous = lines.last().map(String::as_str);
        if !cleaned.is_empty() && previous == Some(cleaned) {
            continue;
        }

        if cleaned.is_empty() {
            consecutive_blank += 1;
            if consecutive_blank > MAX_CONSECUTIVE_BLANK {
                continue;
            }
            lines.push(String::new());
            continue;
        }
        consecutive_blank = 0;
        lines.push(cleaned.to_string());
    }

    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map_or(start, |i| i + 1);

    lines[start..end].join("\n")
}
