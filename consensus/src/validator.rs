//! Result Validator - document-level sanity checks on accepted records
//!
//! Findings either demote a record (confidence × `demotion_factor`, one
//! flag per finding) or reject it outright when the record is structurally
//! incoherent. A demoted record that falls under the confidence threshold
//! becomes an omission.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ConsensusConfig, PlausibilityBand};
use crate::resolver::{ConsensusRecord, Omission, OmissionReason};
use crate::types::ConsensusValue;

/// A demoting finding attached to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum ValidationFlag {
    /// Value outside the plausibility band for this biomarker
    Implausible { min: f64, max: f64 },
    /// Reference range had low > high; bounds were swapped
    RangeInverted,
    /// Numeric value with no unit
    MissingUnit,
}

/// Why a record was excluded outright
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    NonFiniteValue,
    /// Text result outside the qualitative vocabulary
    IncoherentText { text: String },
}

/// A record removed by validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub test_name: String,
    pub canonical_name: String,
    pub reason: RejectionReason,
    pub contributing_agents: Vec<String>,
}

/// Findings that lowered one record's confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Demotion {
    pub test_name: String,
    pub flags: Vec<ValidationFlag>,
    /// Confidence after demotion
    pub confidence: f64,
}

/// What validation did to one batch of accepted records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub records: Vec<ConsensusRecord>,
    /// Records demoted under the confidence threshold
    pub demoted: Vec<Omission>,
    pub rejections: Vec<Rejection>,
    /// Every demotion, whether or not the record survived it
    pub demotions: Vec<Demotion>,
}

#[derive(Debug, Clone)]
pub struct ResultValidator {
    plausibility: BTreeMap<String, PlausibilityBand>,
    unit_exempt: HashSet<String>,
    vocabulary: HashSet<String>,
    demotion_factor: f64,
    confidence_threshold: f64,
}

impl ResultValidator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            plausibility: config.plausibility.clone(),
            unit_exempt: config.unit_exempt.iter().map(|s| s.to_lowercase()).collect(),
            vocabulary: config
                .qualitative_vocabulary
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            demotion_factor: config.demotion_factor,
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn validate(&self, records: Vec<ConsensusRecord>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for mut record in records {
            if let Some(reason) = self.rejection_reason(&record) {
                warn!(
                    test = %record.test_name,
                    reason = ?reason,
                    agents = record.contributing_agents.len(),
                    "Rejected structurally incoherent record"
                );
                outcome.rejections.push(Rejection {
                    test_name: record.test_name,
                    canonical_name: record.canonical_name,
                    reason,
                    contributing_agents: record.contributing_agents,
                });
                continue;
            }

            let flags = self.inspect(&mut record);
            if flags.is_empty() {
                outcome.records.push(record);
                continue;
            }

            record.confidence *= self.demotion_factor.powi(flags.len() as i32);
            debug!(
                test = %record.test_name,
                flags = ?flags,
                confidence = record.confidence,
                "Record demoted"
            );
            outcome.demotions.push(Demotion {
                test_name: record.test_name.clone(),
                flags: flags.clone(),
                confidence: record.confidence,
            });
            record.flags.extend(flags);

            if record.confidence < self.confidence_threshold {
                outcome.demoted.push(Omission {
                    key: record.canonical_name,
                    test_name: record.test_name,
                    reason: OmissionReason::DemotedBelowFloor,
                    agreement_count: record.agreement_count,
                    contributing_agents: record.contributing_agents,
                    confidence: Some(record.confidence),
                });
            } else {
                outcome.records.push(record);
            }
        }

        outcome
    }

    fn rejection_reason(&self, record: &ConsensusRecord) -> Option<RejectionReason> {
        match &record.value {
            ConsensusValue::Numeric(v) | ConsensusValue::Qualified { value: v, .. }
                if !v.is_finite() =>
            {
                Some(RejectionReason::NonFiniteValue)
            }
            ConsensusValue::Text(text) if !self.vocabulary.contains(text) => {
                Some(RejectionReason::IncoherentText { text: text.clone() })
            }
            _ => None,
        }
    }

    /// Collect demoting findings, fixing an inverted range in place.
    fn inspect(&self, record: &mut ConsensusRecord) -> Vec<ValidationFlag> {
        let mut flags = Vec::new();

        if let Some(range) = record.reference_range.as_mut() {
            if let (Some(low), Some(high)) = (range.low, range.high) {
                if low > high {
                    range.low = Some(high);
                    range.high = Some(low);
                    range.rewritten = true;
                    flags.push(ValidationFlag::RangeInverted);
                }
            }
        }

        if let Some(value) = record.value.numeric() {
            if let Some(band) = self.plausibility.get(&record.canonical_name) {
                let unit_matches = match (&band.unit, &record.unit) {
                    (None, _) => true,
                    (Some(b), Some(u)) => b == u,
                    (Some(_), None) => false,
                };
                if unit_matches && !band.contains(value) {
                    flags.push(ValidationFlag::Implausible {
                        min: band.min,
                        max: band.max,
                    });
                }
            }

            if record.unit.is_none() && !self.unit_exempt.contains(&record.canonical_name) {
                flags.push(ValidationFlag::MissingUnit);
            }
        }

        flags
    }
}
