//! Numeric value parsing
//!
//! Agents report values as JSON numbers or as free text such as
//! `"13.5 g/dL"`, `"<0.5"`, `"150,000"` or `"Negative"`.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Qualifier, RawValue};

/// First numeric token: digits with optional comma groups and a decimal part.
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:\d+(?:,\d+)*(?:\.\d+)?|\.\d+)").expect("NUMBER_RE regex should compile")
});

/// Parenthesized annotations such as `(H)` or `(calc)` after a value
static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("ANNOTATION_RE regex should compile"));

/// Outcome of parsing a raw value
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Numeric {
        value: f64,
        qualifier: Option<Qualifier>,
        /// Text following the number, e.g. `g/dL` in `"13.5 g/dL"`
        embedded_unit: Option<String>,
    },
    /// Non-numeric text, lower-cased with whitespace collapsed
    Text(String),
    Missing,
}

/// Convert one numeric token, resolving comma usage.
///
/// - a token with a `.` treats every comma as a thousands separator
/// - comma groups of exactly three digits are thousands separators
/// - otherwise a single comma is a decimal comma
///
/// Tokens that overflow to a non-finite value yield `None`.
pub fn parse_number_token(token: &str) -> Option<f64> {
    parse_token(token.trim()).filter(|v| v.is_finite())
}

fn parse_token(token: &str) -> Option<f64> {
    if !token.contains(',') {
        return token.parse().ok();
    }
    if token.contains('.') {
        return token.replace(',', "").parse().ok();
    }

    let unsigned = token.trim_start_matches(['+', '-']);
    let parts: Vec<&str> = unsigned.split(',').collect();
    let thousands = parts[0].len() <= 3 && parts[1..].iter().all(|p| p.len() == 3);
    if thousands {
        return token.replace(',', "").parse().ok();
    }
    if parts.len() == 2 {
        return token.replacen(',', ".", 1).parse().ok();
    }
    // Irregular grouping: keep the leading group
    let end = token.find(',').unwrap_or(token.len());
    token[..end].parse().ok()
}

/// Parse a raw value into a number, qualified number or text.
pub fn parse_value(raw: Option<&RawValue>) -> ParsedValue {
    match raw {
        None => ParsedValue::Missing,
        Some(RawValue::Number(n)) if !n.is_finite() => ParsedValue::Text(n.to_string()),
        Some(RawValue::Number(n)) => ParsedValue::Numeric {
            value: *n,
            qualifier: None,
            embedded_unit: None,
        },
        Some(RawValue::Text(text)) => parse_text(text),
    }
}

fn parse_text(text: &str) -> ParsedValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParsedValue::Missing;
    }

    let (qualifier, rest) = Qualifier::strip_prefix(trimmed);
    let Some(m) = NUMBER_RE.find(rest) else {
        return ParsedValue::Text(collapse_lower(trimmed));
    };
    let Some(value) = parse_number_token(m.as_str()) else {
        return ParsedValue::Text(collapse_lower(trimmed));
    };

    let tail = ANNOTATION_RE.replace_all(&rest[m.end()..], " ");
    let tail = tail.trim();
    ParsedValue::Numeric {
        value,
        qualifier,
        embedded_unit: (!tail.is_empty()).then(|| tail.to_string()),
    }
}

fn collapse_lower(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
