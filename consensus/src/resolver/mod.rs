//! Consensus Resolver - one match group in, one record or omission out
//!
//! ```text
//! MatchGroup
//!   │ agreement_count < min_agreement_count ──► Omitted(InsufficientAgreement)
//!   ▼
//! unit conversion (values and ranges)
//!   ▼
//! numeric clustering | qualitative vote ─ none ─► Omitted(NoUsableValue)
//!   ▼
//! unit vote, range vote, display-name vote
//!   ▼
//! confidence < confidence_threshold ──────────► Omitted(BelowConfidenceFloor)
//!   ▼
//! Accepted(ConsensusRecord)
//! ```

pub mod cluster;
pub mod confidence;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ClusteringPolicy, ConsensusConfig, UnitConversion};
use crate::matcher::MatchGroup;
use crate::normalize::{unit_key, UnitTable};
use crate::types::{ConsensusValue, NormalizationIssue, Qualifier, ReferenceRange};
use crate::validator::ValidationFlag;

pub use cluster::{resolve_numeric, AgentReliability, ClusterOutcome, NumericVote, ValueBasis};
pub use confidence::{ConfidenceBreakdown, ConfidenceInputs};

/// One reconciled biomarker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusRecord {
    /// Preferred display name
    pub test_name: String,
    pub canonical_name: String,
    pub value: ConsensusValue,
    pub unit: Option<String>,
    pub reference_range: Option<ReferenceRange>,
    pub confidence: f64,
    pub agreement_count: usize,
    pub contributing_agents: Vec<String>,
    pub basis: ValueBasis,
    pub flags: Vec<ValidationFlag>,
}

/// Why a group produced no record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmissionReason {
    /// Fewer agents than `min_agreement_count` reported it
    InsufficientAgreement,
    /// Every member lacked a value
    NoUsableValue,
    /// Confidence below `confidence_threshold`
    BelowConfidenceFloor,
    /// Validation demotions pushed confidence below the threshold
    DemotedBelowFloor,
}

impl OmissionReason {
    pub fn is_low_agreement(&self) -> bool {
        matches!(self, OmissionReason::InsufficientAgreement)
    }
}

impl fmt::Display for OmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientAgreement => write!(f, "insufficient agreement"),
            Self::NoUsableValue => write!(f, "no usable value"),
            Self::BelowConfidenceFloor => write!(f, "below confidence floor"),
            Self::DemotedBelowFloor => write!(f, "demoted below confidence floor"),
        }
    }
}

/// A group that did not become a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Omission {
    pub key: String,
    pub test_name: String,
    pub reason: OmissionReason,
    pub agreement_count: usize,
    pub contributing_agents: Vec<String>,
    /// Computed confidence, when the group got that far
    pub confidence: Option<f64>,
}

/// Outcome of resolving one group
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Accepted(ConsensusRecord),
    Omitted(Omission),
}

impl Resolution {
    pub fn agreement_count(&self) -> usize {
        match self {
            Resolution::Accepted(r) => r.agreement_count,
            Resolution::Omitted(o) => o.agreement_count,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Resolution::Accepted(_))
    }
}

/// Per-document inputs to resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub total_models: usize,
    pub reliability: Option<&'a AgentReliability>,
}

/// A member after unit conversion
#[derive(Debug, Clone)]
struct Converted {
    agent_id: String,
    display_name: String,
    canonical_name: String,
    numeric: Option<f64>,
    qualifier: Option<Qualifier>,
    text: Option<String>,
    /// Value text that is neither a number nor a qualitative result
    unparsed: bool,
    unit: Option<String>,
    unit_recognized: bool,
    range: Option<ReferenceRange>,
    weight: f64,
}

/// Resolves match groups into consensus records
#[derive(Debug, Clone)]
pub struct ConsensusResolver {
    min_agreement_count: usize,
    confidence_threshold: f64,
    breadth_floor: f64,
    clustering: ClusteringPolicy,
    conversions: Vec<UnitConversion>,
    units: UnitTable,
}

impl ConsensusResolver {
    pub fn new(config: &ConsensusConfig, units: UnitTable) -> Self {
        Self {
            min_agreement_count: config.min_agreement_count,
            confidence_threshold: config.confidence_threshold,
            breadth_floor: config.breadth_floor,
            clustering: config.clustering.clone(),
            conversions: config.conversions.clone(),
            units,
        }
    }

    pub fn resolve(&self, group: &MatchGroup, ctx: &ResolutionContext<'_>) -> Resolution {
        let agreement_count = group.len();
        let contributing_agents = group.agents();
        let members: Vec<Converted> = group
            .members
            .iter()
            .map(|m| self.convert(m.into()))
            .collect();
        let test_name = display_name_vote(&members, &group.key);

        let omit = |reason: OmissionReason, confidence: Option<f64>| {
            debug!(
                group = group.id,
                key = %group.key,
                agreement_count,
                %reason,
                "Group omitted"
            );
            Resolution::Omitted(Omission {
                key: group.key.clone(),
                test_name: test_name.clone(),
                reason,
                agreement_count,
                contributing_agents: contributing_agents.clone(),
                confidence,
            })
        };

        if agreement_count < self.min_agreement_count {
            return omit(OmissionReason::InsufficientAgreement, None);
        }

        let votes: Vec<NumericVote> = members
            .iter()
            .filter_map(|m| {
                m.numeric.filter(|v| v.is_finite()).map(|value| NumericVote {
                    agent_id: m.agent_id.clone(),
                    value,
                    qualifier: m.qualifier,
                    weight: m.weight,
                })
            })
            .collect();

        // Unparsed text only competes when no member produced a number
        let (value, basis, weights, values, value_reporters) =
            match resolve_numeric(&votes, &self.clustering, ctx.reliability) {
                Some(outcome) => {
                    let weights: Vec<f64> =
                        outcome.supporters.iter().map(|&i| votes[i].weight).collect();
                    let values: Vec<f64> =
                        outcome.supporters.iter().map(|&i| votes[i].value).collect();
                    let value = match outcome.qualifier {
                        Some(qualifier) => ConsensusValue::Qualified {
                            qualifier,
                            value: outcome.value,
                        },
                        None => ConsensusValue::Numeric(outcome.value),
                    };
                    let reporters = votes.len()
                        + members
                            .iter()
                            .filter(|m| m.text.is_some() && !m.unparsed)
                            .count();
                    (value, outcome.basis, weights, values, reporters)
                }
                None => match text_vote(&members) {
                    Some((text, weights)) => {
                        let reporters = members.iter().filter(|m| m.text.is_some()).count();
                        let value = ConsensusValue::Text(text);
                        (value, ValueBasis::Qualitative, weights, Vec::new(), reporters)
                    }
                    None => return omit(OmissionReason::NoUsableValue, None),
                },
            };

        let breakdown = confidence::score(ConfidenceInputs {
            supporter_weights: &weights,
            supporter_values: &values,
            value_reporters,
            total_models: ctx.total_models,
            relative_tolerance: self.clustering.relative_tolerance,
            breadth_floor: self.breadth_floor,
        });

        if breakdown.score < self.confidence_threshold {
            return omit(OmissionReason::BelowConfidenceFloor, Some(breakdown.score));
        }

        debug!(
            group = group.id,
            key = %group.key,
            agreement_count,
            basis = ?basis,
            breadth = breakdown.breadth,
            cohesion = breakdown.cohesion,
            tightness = breakdown.tightness,
            confidence = breakdown.score,
            "Group accepted"
        );

        Resolution::Accepted(ConsensusRecord {
            test_name,
            canonical_name: group.key.clone(),
            value,
            unit: unit_vote(&members),
            reference_range: range_vote(&members),
            confidence: breakdown.score,
            agreement_count,
            contributing_agents,
            basis,
            flags: Vec::new(),
        })
    }

    /// Express a member in the preferred unit of the first matching rule.
    fn convert(&self, mut member: Converted) -> Converted {
        let Some(unit) = member.unit.as_deref() else {
            return member;
        };
        let key = unit_key(unit);
        if let Some(rule) = self.conversions.iter().find(|c| unit_key(&c.from) == key) {
            member.numeric = member
                .numeric
                .map(|v| v * rule.factor)
                .filter(|v| v.is_finite());
            member.range = member.range.map(|r| r.scaled(rule.factor));
            member.unit_recognized = self.units.is_canonical(&rule.to);
            member.unit = Some(rule.to.clone());
        }
        member
    }
}

impl From<&crate::types::NormalizedRecord> for Converted {
    fn from(r: &crate::types::NormalizedRecord) -> Self {
        Self {
            agent_id: r.agent_id.clone(),
            display_name: r.display_name.clone(),
            canonical_name: r.canonical_name.clone(),
            numeric: r.numeric_value,
            qualifier: r.qualifier,
            text: r.text_value.clone(),
            unparsed: r
                .quality
                .issues
                .iter()
                .any(|i| matches!(i, NormalizationIssue::UnparsedValue { .. })),
            unit: r.unit.clone(),
            unit_recognized: r.unit_recognized,
            range: r.reference_range.clone(),
            weight: r.quality.weight,
        }
    }
}

/// Most common text; ties go to higher summed weight, then the smaller text.
fn text_vote(members: &[Converted]) -> Option<(String, Vec<f64>)> {
    let mut tally: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for m in members {
        if let Some(text) = m.text.as_deref() {
            let entry = tally.entry(text).or_default();
            entry.0 += 1;
            entry.1 += m.weight;
        }
    }
    let mut best: Option<(&str, usize, f64)> = None;
    for (text, (count, weight)) in tally {
        let better = match best {
            None => true,
            Some((_, c, w)) => count > c || (count == c && weight > w),
        };
        if better {
            best = Some((text, count, weight));
        }
    }
    let (winner, _, _) = best?;
    let weights = members
        .iter()
        .filter(|m| m.text.as_deref() == Some(winner))
        .map(|m| m.weight)
        .collect();
    Some((winner.to_string(), weights))
}

/// Majority unit; ties prefer canonical-table units, then the smaller unit.
fn unit_vote(members: &[Converted]) -> Option<String> {
    let mut tally: BTreeMap<&str, (usize, bool)> = BTreeMap::new();
    for m in members {
        if let Some(unit) = m.unit.as_deref() {
            let entry = tally.entry(unit).or_default();
            entry.0 += 1;
            entry.1 |= m.unit_recognized;
        }
    }
    let mut best: Option<(&str, usize, bool)> = None;
    for (unit, (count, recognized)) in tally {
        let better = match best {
            None => true,
            Some((_, c, r)) => count > c || (count == c && recognized && !r),
        };
        if better {
            best = Some((unit, count, recognized));
        }
    }
    best.map(|(unit, _, _)| unit.to_string())
}

/// Majority range; ties prefer more bounds, then the smaller rendering.
fn range_vote(members: &[Converted]) -> Option<ReferenceRange> {
    let mut tally: BTreeMap<String, (usize, &ReferenceRange)> = BTreeMap::new();
    for range in members.iter().filter_map(|m| m.range.as_ref()) {
        tally
            .entry(range.vote_key())
            .and_modify(|e| e.0 += 1)
            .or_insert((1, range));
    }
    tally
        .into_values()
        .min_by(|(ca, ra), (cb, rb)| {
            cb.cmp(ca)
                .then_with(|| rb.specificity().cmp(&ra.specificity()))
                .then_with(|| ra.display().cmp(&rb.display()))
        })
        .map(|(_, range)| range.clone())
}

/// Majority display name; ties prefer a member whose canonical name is the
/// group key, then the smaller name.
fn display_name_vote(members: &[Converted], key: &str) -> String {
    let mut tally: BTreeMap<&str, (usize, bool)> = BTreeMap::new();
    for m in members {
        let entry = tally.entry(m.display_name.as_str()).or_default();
        entry.0 += 1;
        entry.1 |= m.canonical_name == key;
    }
    let mut best: Option<(&str, usize, bool)> = None;
    for (name, (count, keyed)) in tally {
        let better = match best {
            None => true,
            Some((_, c, k)) => count > c || (count == c && keyed && !k),
        };
        if better {
            best = Some((name, count, keyed));
        }
    }
    best.map(|(name, _, _)| name.to_string())
        .unwrap_or_else(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::RecordMatcher;
    use crate::normalize::Normalizer;
    use crate::types::RawBiomarkerRecord;

    fn resolve_with(
        config: &ConsensusConfig,
        raws: Vec<RawBiomarkerRecord>,
        total_models: usize,
    ) -> Vec<Resolution> {
        let normalizer = Normalizer::new(config);
        let records = raws
            .iter()
            .map(|r| normalizer.normalize(&r.agent_id, r))
            .collect();
        let groups = RecordMatcher::new(config.similarity_threshold).group(records);
        let resolver = ConsensusResolver::new(config, normalizer.units().clone());
        let ctx = ResolutionContext {
            total_models,
            reliability: None,
        };
        groups.iter().map(|g| resolver.resolve(g, &ctx)).collect()
    }

    fn resolve(raws: Vec<RawBiomarkerRecord>, total_models: usize) -> Vec<Resolution> {
        resolve_with(&ConsensusConfig::default(), raws, total_models)
    }

    fn accepted(res: &Resolution) -> &ConsensusRecord {
        match res {
            Resolution::Accepted(r) => r,
            Resolution::Omitted(o) => panic!("expected accepted record, got omission {:?}", o),
        }
    }

    #[test]
    fn test_converged_group() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "Hemoglobin", 13.5).with_unit("g/dL"),
                RawBiomarkerRecord::new("b", "Hemoglobin", 13.4).with_unit("g/dL"),
                RawBiomarkerRecord::new("c", "Hemoglobin", 13.6).with_unit("g/dL"),
            ],
            3,
        );
        let rec = accepted(&out[0]);
        assert!((rec.value.numeric().unwrap() - 13.5).abs() < 1e-9);
        assert_eq!(rec.unit.as_deref(), Some("g/dL"));
        assert_eq!(rec.agreement_count, 3);
        assert_eq!(rec.basis, ValueBasis::Converged);
        assert!(rec.confidence > 0.9);
    }

    #[test]
    fn test_single_agent_is_omitted() {
        let out = resolve(
            vec![RawBiomarkerRecord::new("a", "Ferritin", 80.0).with_unit("ng/mL")],
            3,
        );
        match &out[0] {
            Resolution::Omitted(o) => {
                assert_eq!(o.reason, OmissionReason::InsufficientAgreement);
                assert_eq!(o.contributing_agents, vec!["a"]);
            }
            other => panic!("expected omission, got {:?}", other),
        }
    }

    #[test]
    fn test_unit_conversion_before_comparison() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "Hgb", 13.5).with_unit("g/dL"),
                RawBiomarkerRecord::new("b", "Hemoglobin", "135 g/L"),
            ],
            2,
        );
        assert_eq!(out.len(), 1);
        let rec = accepted(&out[0]);
        assert!((rec.value.numeric().unwrap() - 13.5).abs() < 1e-9);
        assert_eq!(rec.unit.as_deref(), Some("g/dL"));
        assert_eq!(rec.test_name, "Hemoglobin");
    }

    #[test]
    fn test_converted_range_is_rescaled() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "Hemoglobin", 135.0)
                    .with_unit("g/L")
                    .with_range("130 - 170"),
                RawBiomarkerRecord::new("b", "Hemoglobin", 135.0)
                    .with_unit("g/L")
                    .with_range("130 - 170"),
            ],
            2,
        );
        let rec = accepted(&out[0]);
        let range = rec.reference_range.as_ref().unwrap();
        assert!((range.low.unwrap() - 13.0).abs() < 1e-9);
        assert_eq!(range.display(), "13 - 17");
    }

    #[test]
    fn test_divergent_values_fall_below_floor() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "Glucose", 90.0).with_unit("mg/dL"),
                RawBiomarkerRecord::new("b", "Glucose", 180.0).with_unit("mg/dL"),
            ],
            2,
        );
        match &out[0] {
            Resolution::Omitted(o) => {
                assert_eq!(o.reason, OmissionReason::BelowConfidenceFloor);
                assert!(o.confidence.unwrap() < 0.7);
            }
            other => panic!("expected omission, got {:?}", other),
        }
    }

    #[test]
    fn test_majority_with_outlier() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "Glucose", 90.0).with_unit("mg/dL"),
                RawBiomarkerRecord::new("b", "Glucose", 90.5).with_unit("mg/dL"),
                RawBiomarkerRecord::new("c", "Glucose", 91.0).with_unit("mg/dL"),
                RawBiomarkerRecord::new("d", "Glucose", 900.0).with_unit("mg/dL"),
            ],
            4,
        );
        let rec = accepted(&out[0]);
        assert_eq!(rec.basis, ValueBasis::Majority);
        assert_eq!(rec.value, ConsensusValue::Numeric(90.5));
        assert_eq!(rec.agreement_count, 4);
        // The dissenting agent caps confidence below the unanimous case
        assert!(rec.confidence < 0.8);
    }

    #[test]
    fn test_qualitative_vote() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "HBsAg", "Negative"),
                RawBiomarkerRecord::new("b", "HBsAg", "negative"),
                RawBiomarkerRecord::new("c", "HBsAg", "Negative "),
            ],
            3,
        );
        let rec = accepted(&out[0]);
        assert_eq!(rec.value, ConsensusValue::Text("negative".into()));
        assert_eq!(rec.basis, ValueBasis::Qualitative);
        assert!(rec.unit.is_none());
    }

    #[test]
    fn test_no_usable_value() {
        let blank = |agent: &str| RawBiomarkerRecord {
            agent_id: agent.into(),
            test_name: "Lipase".into(),
            value: None,
            unit: None,
            reference_range: None,
        };
        let out = resolve(vec![blank("a"), blank("b")], 2);
        assert!(matches!(
            &out[0],
            Resolution::Omitted(Omission {
                reason: OmissionReason::NoUsableValue,
                ..
            })
        ));
    }

    #[test]
    fn test_unit_vote_prefers_canonical_on_tie() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "TSH", 2.0).with_unit("uIU/mL"),
                RawBiomarkerRecord::new("b", "TSH", 2.0).with_unit("micro-units"),
            ],
            2,
        );
        let rec = accepted(&out[0]);
        assert_eq!(rec.unit.as_deref(), Some("uIU/mL"));
    }

    #[test]
    fn test_range_vote_prefers_specific_on_tie() {
        let out = resolve(
            vec![
                RawBiomarkerRecord::new("a", "TSH", 2.0)
                    .with_unit("uIU/mL")
                    .with_range("< 4.5"),
                RawBiomarkerRecord::new("b", "TSH", 2.0)
                    .with_unit("uIU/mL")
                    .with_range("0.4 - 4.5"),
            ],
            2,
        );
        let rec = accepted(&out[0]);
        assert_eq!(rec.reference_range.as_ref().unwrap().specificity(), 2);
    }

    #[test]
    fn test_min_agreement_of_one_allows_singletons() {
        let config = ConsensusConfig::default()
            .with_min_agreement_count(1)
            .with_confidence_threshold(0.0);
        let out = resolve_with(
            &config,
            vec![RawBiomarkerRecord::new("a", "Ferritin", 80.0).with_unit("ng/mL")],
            3,
        );
        assert!(out[0].is_accepted());
    }
}
