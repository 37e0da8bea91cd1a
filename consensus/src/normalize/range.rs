//! Reference range parsing

use std::sync::LazyLock;

use regex::Regex;

use super::value::parse_number_token;
use crate::types::{Qualifier, ReferenceRange};

/// `a - b`, `a – b`, `a to b`, optionally followed by a unit
static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(\d+(?:[.,]\d+)*)\s*(?:-|–|—|to)\s*(\d+(?:[.,]\d+)*)(?:\s.*|[^\d.,].*)?$",
    )
    .expect("INTERVAL_RE regex should compile")
});

/// `< b`, `<= b`, `> a`, `>= a`, optionally followed by a unit
static ONE_SIDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(<=|>=|≤|≥|<|>)\s*(\d+(?:[.,]\d+)*)(?:\s.*|[^\d.,].*)?$")
        .expect("ONE_SIDED_RE regex should compile")
});

/// Parse a reference range. Unrecognized text is kept with no bounds.
pub fn parse_range(raw: &str) -> ReferenceRange {
    if let Some(caps) = INTERVAL_RE.captures(raw) {
        let low = parse_number_token(&caps[1]);
        let high = parse_number_token(&caps[2]);
        if low.is_some() && high.is_some() {
            return ReferenceRange::bounded(low, high, raw);
        }
    }

    if let Some(caps) = ONE_SIDED_RE.captures(raw) {
        let (qualifier, _) = Qualifier::strip_prefix(&caps[1]);
        if let (Some(q), Some(bound)) = (qualifier, parse_number_token(&caps[2])) {
            return match q {
                Qualifier::LessThan | Qualifier::LessOrEqual => {
                    ReferenceRange::bounded(None, Some(bound), raw)
                }
                Qualifier::GreaterThan | Qualifier::GreaterOrEqual => {
                    ReferenceRange::bounded(Some(bound), None, raw)
                }
            };
        }
    }

    ReferenceRange::unparsed(raw)
}
