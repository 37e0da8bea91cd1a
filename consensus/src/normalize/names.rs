//! Test-name cleaning and alias resolution

use std::collections::{BTreeMap, HashMap};

/// Canonical name used when an agent reports a record with no usable name.
pub const UNKNOWN_TEST: &str = "unknown test";

/// Lower-case, drop punctuation, collapse whitespace.
///
/// `"  Hb (Hemoglobin)! "` becomes `"hb hemoglobin"`.
pub fn clean_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq)]
struct AliasTarget {
    canonical: String,
    display: String,
}

/// Cleaned alias → canonical name lookup.
///
/// Display names are entered as aliases of themselves, so an already
/// canonical name resolves to itself.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, AliasTarget>,
}

/// Result of resolving one test name
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    pub canonical: String,
    pub display: String,
    /// Name was empty after cleaning
    pub unknown: bool,
}

impl AliasTable {
    pub fn from_config(aliases: &BTreeMap<String, Vec<String>>) -> Self {
        let mut entries = HashMap::new();
        for (display, list) in aliases {
            let target = AliasTarget {
                canonical: clean_name(display),
                display: display.clone(),
            };
            for alias in std::iter::once(display).chain(list.iter()) {
                entries
                    .entry(clean_name(alias))
                    .or_insert_with(|| target.clone());
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a raw test name to its canonical and display forms.
    pub fn resolve(&self, raw_name: &str) -> ResolvedName {
        let cleaned = clean_name(raw_name);
        if cleaned.is_empty() {
            return ResolvedName {
                canonical: UNKNOWN_TEST.to_string(),
                display: "Unknown Test".to_string(),
                unknown: true,
            };
        }
        match self.entries.get(&cleaned) {
            Some(target) => ResolvedName {
                canonical: target.canonical.clone(),
                display: target.display.clone(),
                unknown: false,
            },
            None => ResolvedName {
                canonical: cleaned,
                display: raw_name.split_whitespace().collect::<Vec<_>>().join(" "),
                unknown: false,
            },
        }
    }
}
