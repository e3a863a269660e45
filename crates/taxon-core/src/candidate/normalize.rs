//! Text Normalization
//!
//! The fixed normalization pipeline applied to every captured snippet
//! before hashing. Order matters and is part of the engine contract,
//! because the normalized text feeds both the candidate id and the
//! cross-batch content hash:
//!
//! 1. lowercase
//! 2. trim
//! 3. collapse whitespace
//! 4. strip hyphenated line-breaks
//! 5. replace smart quotes with ASCII equivalents
//! 6. collapse punctuation spacing
//! 7. strip navigation/footer/breadcrumb fragments
//!
//! The pipeline is idempotent: `normalize(normalize(x)) == normalize(x)`.

/// Phrases that OCR frequently drags in from page chrome.
///
/// Matched case-insensitively against the already-lowercased text, so the
/// entries here are lowercase by construction.
const NAVIGATION_FRAGMENTS: &[&str] = &[
    "click here",
    "read more",
    "next page",
    "previous page",
    "skip to content",
    "back to top",
    "all rights reserved",
    "terms of service",
    "privacy policy",
    "accept cookies",
    "cookie settings",
    "subscribe to our newsletter",
    "sign in",
    "log in",
];

/// Run the full normalization pipeline.
pub fn normalize(raw: &str) -> String {
    let text = raw.to_lowercase();
    let text = collapse_whitespace(text.trim());
    let text = strip_hyphenated_breaks(&text);
    let text = replace_smart_quotes(&text);
    let text = collapse_punctuation_spacing(&text);
    let text = strip_navigation_fragments(&text);
    // Fragment removal can leave doubled spaces behind.
    collapse_whitespace(text.trim())
}

/// Collapse every whitespace run (including newlines) to a single space.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_gap = true;
        } else {
            if in_gap && !out.is_empty() {
                out.push(' ');
            }
            in_gap = false;
            out.push(ch);
        }
    }
    out
}

/// Rejoin words split across lines by a trailing hyphen.
///
/// After whitespace collapsing a hyphenated line-break surfaces as
/// `letter "- " letter`; the hyphen and the gap are both dropped.
fn strip_hyphenated_breaks(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let is_break = chars[i] == '-'
            && i > 0
            && chars[i - 1].is_alphabetic()
            && i + 2 < chars.len()
            && chars[i + 1] == ' '
            && chars[i + 2].is_alphabetic();
        if is_break {
            i += 2; // skip "- ", joining the halves
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Replace common smart-quote code points with their ASCII equivalents.
fn replace_smart_quotes(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2026}' => '.',
            other => other,
        })
        .collect()
}

/// Drop spaces that OCR inserts before closing punctuation.
fn collapse_punctuation_spacing(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']') {
            while out.ends_with(' ') {
                out.pop();
            }
        }
        out.push(ch);
    }
    out
}

/// Remove page-chrome fragments and breadcrumb separators.
///
/// Fragments only match on word boundaries, so "sign in" never bites into
/// "design integrity".
fn strip_navigation_fragments(text: &str) -> String {
    let mut out = text.to_string();
    for fragment in NAVIGATION_FRAGMENTS {
        let mut search_from = 0;
        while let Some(found) = out[search_from..].find(fragment) {
            let pos = search_from + found;
            let end = pos + fragment.len();
            let bounded_left = pos == 0
                || !out[..pos].chars().next_back().is_some_and(char::is_alphanumeric);
            let bounded_right = end == out.len()
                || !out[end..].chars().next().is_some_and(char::is_alphanumeric);
            if bounded_left && bounded_right {
                out.replace_range(pos..end, " ");
                search_from = pos;
            } else {
                search_from = pos + 1;
            }
        }
    }
    // Breadcrumb separators ("home > courses > algebra") degrade to noise
    // once the labels around them are gone.
    out = out.replace(" > ", " ").replace(" » ", " ").replace(" › ", " ");
    out
}

// ============================================================================
// TESTS
// ============================================================================
