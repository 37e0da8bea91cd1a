//! Core data types shared by every pipeline stage
//!
//! Raw types mirror what extraction agents emit; normalized types are what
//! the matcher and resolver compare. Nothing here is mutated after creation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Identifier of an extraction agent (e.g. `"gemini_flash"`, `"gpt4_vision"`)
pub type AgentId = String;

/// A value as the agent reported it: a JSON number or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

/// One biomarker as produced by a single agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBiomarkerRecord {
    /// Producing agent. The batch key is authoritative; this may be empty
    /// when records are deserialized straight from agent output.
    #[serde(default)]
    pub agent_id: AgentId,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub value: Option<RawValue>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub reference_range: Option<String>,
}

impl RawBiomarkerRecord {
    pub fn new(agent_id: &str, test_name: &str, value: impl Into<RawValue>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            test_name: test_name.to_string(),
            value: Some(value.into()),
            unit: None,
            reference_range: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, range: &str) -> Self {
        self.reference_range = Some(range.to_string());
        self
    }
}

/// Why an agent produced no usable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailureKind {
    /// The agent errored or panicked
    Crashed,
    /// The agent did not answer within its deadline
    TimedOut,
    /// The agent answered but the output could not be parsed
    Malformed,
    /// The agent answered with no biomarkers
    Empty,
}

impl fmt::Display for AgentFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crashed => write!(f, "crashed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Malformed => write!(f, "malformed"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Resolved outcome of one agent for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success {
        records: Vec<RawBiomarkerRecord>,
    },
    Failed {
        kind: AgentFailureKind,
        #[serde(default)]
        detail: String,
    },
}

impl AgentOutcome {
    pub fn success(records: Vec<RawBiomarkerRecord>) -> Self {
        AgentOutcome::Success { records }
    }

    pub fn failed(kind: AgentFailureKind, detail: impl Into<String>) -> Self {
        AgentOutcome::Failed {
            kind,
            detail: detail.into(),
        }
    }

    /// Usable output: a success carrying at least one record.
    pub fn is_usable(&self) -> bool {
        matches!(self, AgentOutcome::Success { records } if !records.is_empty())
    }
}

/// Everything the orchestration layer hands to the core for one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    /// Outcome per agent, ordered by agent id
    pub outcomes: BTreeMap<AgentId, AgentOutcome>,
    /// Number of agents the orchestrator attempted, if it knows more agents
    /// were launched than reported back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_total: Option<usize>,
}

impl ExtractionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, agent_id: &str, outcome: AgentOutcome) -> Self {
        self.insert(agent_id, outcome);
        self
    }

    pub fn with_declared_total(mut self, total: usize) -> Self {
        self.declared_total = Some(total);
        self
    }

    pub fn insert(&mut self, agent_id: &str, outcome: AgentOutcome) {
        self.outcomes.insert(agent_id.to_string(), outcome);
    }

    /// Attempted vs usable agent counts.
    ///
    /// A declared total smaller than the number of reported outcomes is
    /// ignored.
    pub fn tally(&self) -> AgentTally {
        let reported = self.outcomes.len();
        let total_models = self.declared_total.map_or(reported, |d| d.max(reported));
        let successful_models = self.outcomes.values().filter(|o| o.is_usable()).count();
        AgentTally {
            total_models,
            successful_models,
        }
    }
}

/// Attempted and successful agent counts for one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTally {
    pub total_models: usize,
    pub successful_models: usize,
}

impl AgentTally {
    pub fn is_total_failure(&self) -> bool {
        self.total_models == 0 || self.successful_models == 0
    }
}

/// Inequality attached to a value such as `<5` or `>=10`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl Qualifier {
    pub fn symbol(&self) -> &'static str {
        match self {
            Qualifier::LessThan => "<",
            Qualifier::LessOrEqual => "<=",
            Qualifier::GreaterThan => ">",
            Qualifier::GreaterOrEqual => ">=",
        }
    }

    /// Split a leading qualifier off `text`, returning the remainder.
    pub fn strip_prefix(text: &str) -> (Option<Qualifier>, &str) {
        let text = text.trim_start();
        for (prefix, q) in [
            ("<=", Qualifier::LessOrEqual),
            (">=", Qualifier::GreaterOrEqual),
            ("≤", Qualifier::LessOrEqual),
            ("≥", Qualifier::GreaterOrEqual),
            ("<", Qualifier::LessThan),
            (">", Qualifier::GreaterThan),
        ] {
            if let Some(rest) = text.strip_prefix(prefix) {
                return (Some(q), rest.trim_start());
            }
        }
        (None, text)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Parsed reference interval. `raw` always keeps the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub raw: String,
    /// Bounds were rescaled or reordered, so `raw` is stale
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rewritten: bool,
}

impl ReferenceRange {
    pub fn unparsed(raw: &str) -> Self {
        Self {
            low: None,
            high: None,
            raw: raw.trim().to_string(),
            rewritten: false,
        }
    }

    pub fn bounded(low: Option<f64>, high: Option<f64>, raw: &str) -> Self {
        Self {
            low,
            high,
            raw: raw.trim().to_string(),
            rewritten: false,
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.low.is_some() || self.high.is_some()
    }

    /// 2 for a closed interval, 1 for a single bound, 0 for raw text only.
    pub fn specificity(&self) -> u8 {
        self.low.is_some() as u8 + self.high.is_some() as u8
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            low: self.low.map(|v| v * factor),
            high: self.high.map(|v| v * factor),
            raw: self.raw.clone(),
            rewritten: self.is_parsed() || self.rewritten,
        }
    }

    /// Human-readable rendering used in the output boundary.
    pub fn display(&self) -> String {
        if !self.rewritten && !self.raw.is_empty() {
            return self.raw.clone();
        }
        match (self.low, self.high) {
            (Some(lo), Some(hi)) => format!("{} - {}", format_number(lo), format_number(hi)),
            (None, Some(hi)) => format!("< {}", format_number(hi)),
            (Some(lo), None) => format!("> {}", format_number(lo)),
            (None, None) => self.raw.clone(),
        }
    }

    /// Key used when voting: parsed bounds rounded, or the raw text.
    pub(crate) fn vote_key(&self) -> String {
        if self.is_parsed() {
            format!(
                "{}|{}",
                self.low.map(round_key).unwrap_or_default(),
                self.high.map(round_key).unwrap_or_default()
            )
        } else {
            format!("raw:{}", self.raw.to_lowercase())
        }
    }
}

fn round_key(v: f64) -> String {
    format!("{:.6}", v)
}

/// Render a float without trailing noise from unit conversion.
pub fn format_number(v: f64) -> String {
    let rounded = (v * 1e6).round() / 1e6;
    format!("{}", rounded)
}

/// A specific reason a field could not be fully normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum NormalizationIssue {
    EmptyName,
    MissingValue,
    /// Text in the qualitative vocabulary ("negative", "trace")
    QualitativeValue,
    UnparsedValue { raw: String },
    UnparsedRange { raw: String },
    UnrecognizedUnit { raw: String },
}

impl NormalizationIssue {
    /// Multiplicative weight applied to the record's vote.
    pub fn penalty(&self) -> f64 {
        match self {
            Self::EmptyName => 0.5,
            Self::MissingValue => 0.5,
            Self::QualitativeValue => 0.9,
            Self::UnparsedValue { .. } => 0.5,
            Self::UnparsedRange { .. } => 0.85,
            Self::UnrecognizedUnit { .. } => 0.95,
        }
    }
}

/// How much a normalized record can be trusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationQuality {
    /// Vote weight in (0, 1]
    pub weight: f64,
    pub issues: Vec<NormalizationIssue>,
}

impl NormalizationQuality {
    pub fn full() -> Self {
        Self {
            weight: 1.0,
            issues: Vec::new(),
        }
    }

    pub fn degrade(&mut self, issue: NormalizationIssue) {
        self.weight *= issue.penalty();
        self.issues.push(issue);
    }

    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }
}

impl Default for NormalizationQuality {
    fn default() -> Self {
        Self::full()
    }
}

/// A raw record after canonicalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub agent_id: AgentId,
    /// Matching key: cleaned, alias-resolved name
    pub canonical_name: String,
    /// Preferred display form for output
    pub display_name: String,
    pub numeric_value: Option<f64>,
    pub qualifier: Option<Qualifier>,
    /// Lower-cased text for non-numeric values
    pub text_value: Option<String>,
    pub unit: Option<String>,
    /// Whether `unit` came from the canonical unit table
    pub unit_recognized: bool,
    pub reference_range: Option<ReferenceRange>,
    pub quality: NormalizationQuality,
    pub raw: RawBiomarkerRecord,
}

impl NormalizedRecord {
    pub fn has_value(&self) -> bool {
        self.numeric_value.is_some() || self.text_value.is_some()
    }
}

/// Reconciled value of a biomarker
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusValue {
    Numeric(f64),
    Qualified { qualifier: Qualifier, value: f64 },
    Text(String),
}

impl ConsensusValue {
    pub fn numeric(&self) -> Option<f64> {
        match self {
            ConsensusValue::Numeric(v) => Some(*v),
            ConsensusValue::Qualified { value, .. } => Some(*value),
            ConsensusValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ConsensusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusValue::Numeric(v) => f.write_str(&format_number(*v)),
            ConsensusValue::Qualified { qualifier, value } => {
                write!(f, "{}{}", qualifier, format_number(*value))
            }
            ConsensusValue::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for ConsensusValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConsensusValue::Numeric(v) => {
                serializer.serialize_f64((v * 1e6).round() / 1e6)
            }
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}
