//! Tolerant parsing of model output.
//!
//! Judge and routing prompts ask for a bare number or a numbered list, but
//! models decorate their answers. These helpers extract what the caller
//! needs and let the caller decide what a miss means.

/// First number found in `text` that falls inside `[lo, hi]`.
///
/// Accepts integers and simple decimals (`7`, `8.5`). Numbers outside the
/// range are skipped so "on a 0-10 scale I give 7" still parses as 7.
pub fn first_number_in(text: &str, lo: f64, hi: f64) -> Option<f64> {
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !c.is_ascii_digit() {
            continue;
        }
        let mut end = start + c.len_utf8();
        let mut seen_dot = false;
        while let Some(&(i, next)) = chars.peek() {
            if next.is_ascii_digit() || (next == '.' && !seen_dot) {
                seen_dot |= next == '.';
                end = i + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let slice = text[start..end].trim_end_matches('.');
        if let Ok(value) = slice.parse::<f64>() {
            if value >= lo && value <= hi {
                return Some(value);
            }
        }
    }
    None
}

/// Items of a `1. …` / `2) …` numbered list, one per line.
///
/// Lines that do not start with a number are ignored; returns an empty
/// vector when nothing parses.
pub fn numbered_items(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let rest = trimmed[digits.len()..].trim_start();
        let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')).unwrap_or(rest);
        let item = rest.trim();
        if !item.is_empty() {
            items.push(item.to_string());
        }
    }
    items
}
