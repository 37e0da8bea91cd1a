//! Unit canonicalization

use std::collections::{BTreeMap, HashMap};

/// Lookup key for a unit: lower-case, no whitespace, micro sign as `u`.
pub fn unit_key(unit: &str) -> String {
    unit.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            'µ' | 'μ' => 'u',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// A unit after lookup
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUnit {
    pub unit: String,
    /// Found in the canonical table
    pub recognized: bool,
}

/// Canonical unit table keyed by [`unit_key`]
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    entries: HashMap<String, String>,
}

impl UnitTable {
    pub fn from_config(units: &BTreeMap<String, String>) -> Self {
        let mut entries = HashMap::new();
        for (spelling, canonical) in units {
            entries.insert(unit_key(spelling), canonical.clone());
        }
        // Canonical spellings always map to themselves
        for canonical in units.values() {
            entries
                .entry(unit_key(canonical))
                .or_insert_with(|| canonical.clone());
        }
        Self { entries }
    }

    /// Canonicalize a unit. Returns `None` for blank input; unknown units
    /// pass through trimmed.
    pub fn normalize(&self, raw: &str) -> Option<NormalizedUnit> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match self.entries.get(&unit_key(trimmed)) {
            Some(canonical) => NormalizedUnit {
                unit: canonical.clone(),
                recognized: true,
            },
            None => NormalizedUnit {
                unit: trimmed.to_string(),
                recognized: false,
            },
        })
    }

    pub fn is_canonical(&self, unit: &str) -> bool {
        self.entries.get(&unit_key(unit)).is_some_and(|c| c == unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;

    fn table() -> UnitTable {
        UnitTable::from_config(&ConsensusConfig::default().units)
    }

    #[test]
    fn test_unit_key() {
        assert_eq!(unit_key(" mg / dL "), "mg/dl");
        assert_eq!(unit_key("µmol/L"), "umol/l");
        assert_eq!(unit_key("μIU/mL"), "uiu/ml");
    }

    #[test]
    fn test_known_units() {
        let table = table();
        assert_eq!(table.normalize("MG/DL").unwrap().unit, "mg/dL");
        assert_eq!(table.normalize("K/µL").unwrap().unit, "10^3/uL");
        assert_eq!(table.normalize("g %").unwrap().unit, "g/dL");
        assert_eq!(table.normalize("million/mm3").unwrap().unit, "10^6/uL");
        assert!(table.normalize("fl").unwrap().recognized);
    }

    #[test]
    fn test_canonical_spelling_is_stable() {
        let table = table();
        for unit in ["mg/dL", "g/L", "10^3/uL", "uIU/mL", "U/L"] {
            let n = table.normalize(unit).unwrap();
            assert_eq!(n.unit, unit);
            assert!(table.is_canonical(unit));
        }
    }

    #[test]
    fn test_unknown_unit_passes_through() {
        let table = table();
        let n = table.normalize("  cells/hpf ").unwrap();
        assert_eq!(n.unit, "cells/hpf");
        assert!(!n.recognized);
        assert!(table.normalize("   ").is_none());
    }
}
