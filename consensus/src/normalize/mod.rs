//! Field Normalizer - canonicalizes one agent record at a time
//!
//! ```text
//! RawBiomarkerRecord
//!   ├─ test_name       → clean → alias table → canonical_name / display_name
//!   ├─ value           → qualifier + first numeric token (+ embedded unit) | text
//!   ├─ unit            → unit table (falls back to the embedded unit)
//!   └─ reference_range → low / high bounds
//! ```
//!
//! Normalization never fails. Anything that cannot be interpreted is kept
//! in its raw form and recorded as a [`NormalizationIssue`] that lowers the
//! record's vote weight.

pub mod names;
pub mod range;
pub mod units;
pub mod value;

use std::collections::HashSet;

use tracing::debug;

use crate::config::ConsensusConfig;
use crate::types::{NormalizationIssue, NormalizationQuality, NormalizedRecord, RawBiomarkerRecord};

pub use names::{clean_name, AliasTable, ResolvedName, UNKNOWN_TEST};
pub use range::parse_range;
pub use units::{unit_key, NormalizedUnit, UnitTable};
pub use value::{parse_number_token, parse_value, ParsedValue};

/// Stateless record normalizer built from a [`ConsensusConfig`]
#[derive(Debug, Clone)]
pub struct Normalizer {
    aliases: AliasTable,
    units: UnitTable,
    vocabulary: HashSet<String>,
}

impl Normalizer {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            aliases: AliasTable::from_config(&config.aliases),
            units: UnitTable::from_config(&config.units),
            vocabulary: config
                .qualitative_vocabulary
                .iter()
                .map(|v| v.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    /// Whether `text` is an accepted non-numeric result
    pub fn is_qualitative(&self, text: &str) -> bool {
        self.vocabulary.contains(&text.trim().to_lowercase())
    }

    /// Normalize one record. `agent_id` is the authoritative producer id.
    pub fn normalize(&self, agent_id: &str, raw: &RawBiomarkerRecord) -> NormalizedRecord {
        let mut quality = NormalizationQuality::full();

        let name = self.aliases.resolve(&raw.test_name);
        if name.unknown {
            quality.degrade(NormalizationIssue::EmptyName);
        }

        let (numeric_value, qualifier, text_value, embedded_unit) =
            match parse_value(raw.value.as_ref()) {
                ParsedValue::Numeric {
                    value,
                    qualifier,
                    embedded_unit,
                } => (Some(value), qualifier, None, embedded_unit),
                ParsedValue::Text(text) => {
                    if self.is_qualitative(&text) {
                        quality.degrade(NormalizationIssue::QualitativeValue);
                    } else {
                        quality.degrade(NormalizationIssue::UnparsedValue {
                            raw: raw.value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                        });
                    }
                    (None, None, Some(text), None)
                }
                ParsedValue::Missing => {
                    quality.degrade(NormalizationIssue::MissingValue);
                    (None, None, None, None)
                }
            };

        let unit_source = raw
            .unit
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(embedded_unit.as_deref());
        let unit = unit_source.and_then(|u| self.units.normalize(u));
        if let Some(u) = unit.as_ref().filter(|u| !u.recognized) {
            quality.degrade(NormalizationIssue::UnrecognizedUnit { raw: u.unit.clone() });
        }

        let reference_range = raw
            .reference_range
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(parse_range);
        if let Some(r) = reference_range.as_ref().filter(|r| !r.is_parsed()) {
            quality.degrade(NormalizationIssue::UnparsedRange { raw: r.raw.clone() });
        }

        if quality.is_degraded() {
            debug!(
                agent = agent_id,
                test = %raw.test_name,
                weight = quality.weight,
                issues = quality.issues.len(),
                "Normalization degraded"
            );
        }

        NormalizedRecord {
            agent_id: agent_id.to_string(),
            canonical_name: name.canonical,
            display_name: name.display,
            numeric_value,
            qualifier,
            text_value,
            unit_recognized: unit.as_ref().is_some_and(|u| u.recognized),
            unit: unit.map(|u| u.unit),
            reference_range,
            quality,
            raw: raw.clone(),
        }
    }

    /// Normalize every record of one agent, preserving input order.
    pub fn normalize_all(
        &self,
        agent_id: &str,
        records: &[RawBiomarkerRecord],
    ) -> Vec<NormalizedRecord> {
        records.iter().map(|r| self.normalize(agent_id, r)).collect()
    }
}
