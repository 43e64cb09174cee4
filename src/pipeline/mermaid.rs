//! Diagram source sanitizing.
//!
//! The diagram runtime treats a quoted node label that starts a line with
//! `- `, `* ` or `1. ` as a markdown list and mangles it. A zero-width space
//! right after the marker defuses the list syntax while rendering identically.
//! Only the inside of quoted literals is touched.

use once_cell::sync::Lazy;
use regex::Regex;

/// Inserted after a list-like marker inside a quoted label.
pub const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Double- or single-quoted literal, backslash escapes honoured.
static RE_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).unwrap());

/// A marker at line start (after indentation) followed by whitespace.
static RE_LINE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)(-|\*|\d+\.)([ \t])").unwrap());

/// Defuse list markers inside the quoted literals of a diagram source.
///
/// Text outside literals is returned byte-identical.
pub fn sanitize(source: &str) -> String {
    RE_LITERAL
        .replace_all(source, |caps: &regex::Captures| sanitize_literal(&caps[0]))
        .into_owned()
}

fn sanitize_literal(literal: &str) -> String {
    // The opening quote sits at line start; skip it so `"- x"` sees `- x`.
    let (quote, body) = literal.split_at(1);
    let body = RE_LINE_MARKER.replace_all(body, format!("${{1}}${{2}}{ZERO_WIDTH_SPACE}${{3}}").as_str());
    format!("{quote}{body}")
}
