//! Optional LLM adjudication over the statistical consensus
//!
//! ```text
//! ExtractionBatch + ConsensusReport
//!   │
//!   ▼
//! Adjudicator (deadline) ── ok, known biomarkers ──► adjudicated biomarkers
//!   │ error / timeout / nothing usable
//!   ▼
//! statistical ConsensusOutput, unchanged
//! ```
//!
//! Statistics and metadata always come from the deterministic report. An
//! adjudicated entry survives only if at least one agent reported a test with
//! the same canonical name, so the adjudicator can pick between extractions
//! but never add a biomarker of its own.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use consensus::{
    BiomarkerEntry, ConsensusOutput, ConsensusReport, ConsensusValue, ExtractionBatch,
    NormalizedRecord, Normalizer, RawBiomarkerRecord,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::agents::chat::complete;
use crate::config::EndpointConfig;
use crate::error::{AgentError, AgentResult};
use crate::parse::{parse_agent_output, parse_notes};

/// System prompt for the adjudication request
pub const ADJUDICATION_PROMPT: &str = "\
You validate laboratory data extracted from one lab report by several models.

The user message is a JSON object with each model's extraction under
\"extractions\" and a statistical consensus under \"statistical\".

For every test, compare the values, units and reference ranges across the
extractions and choose the most plausible reading. Only report tests that
appear in at least one extraction.

Return ONLY a JSON object, with no prose and no markdown, in this shape:

{\"biomarkers\": [{\"test_name\": \"Hemoglobin\", \"value\": 13.5, \"unit\": \"g/dL\", \"reference_range\": \"13.0 - 17.0\"}],
 \"notes\": [\"Discrepancy in WBC count resolved by majority\"]}";

/// Id recorded for adjudicated entries
const ADJUDICATOR_AGENT: &str = "adjudicator";

/// Everything the adjudicator sees
#[derive(Debug, Clone, Serialize)]
pub struct AdjudicationRequest {
    /// Usable records per agent
    pub extractions: BTreeMap<String, Vec<RawBiomarkerRecord>>,
    pub statistical: ConsensusOutput,
}

impl AdjudicationRequest {
    pub fn new(batch: &ExtractionBatch, report: &ConsensusReport) -> Self {
        let extractions = batch
            .outcomes
            .iter()
            .filter_map(|(agent, outcome)| match outcome {
                consensus::AgentOutcome::Success { records } if !records.is_empty() => {
                    Some((agent.clone(), records.clone()))
                }
                _ => None,
            })
            .collect();
        Self {
            extractions,
            statistical: report.to_output(),
        }
    }
}

/// Raw adjudicator answer
#[derive(Debug, Clone, PartialEq)]
pub struct Adjudication {
    pub records: Vec<RawBiomarkerRecord>,
    pub notes: Vec<String>,
}

#[async_trait]
pub trait Adjudicator: Send + Sync {
    fn id(&self) -> &str;

    async fn adjudicate(&self, request: &AdjudicationRequest) -> AgentResult<Adjudication>;
}

/// Adjudicates through one chat-completion endpoint
#[derive(Debug, Clone)]
pub struct ChatAdjudicator {
    endpoint: EndpointConfig,
    http: reqwest::Client,
}

impl ChatAdjudicator {
    pub fn new(endpoint: EndpointConfig, http: reqwest::Client) -> Self {
        Self { endpoint, http }
    }
}

#[async_trait]
impl Adjudicator for ChatAdjudicator {
    fn id(&self) -> &str {
        &self.endpoint.id
    }

    async fn adjudicate(&self, request: &AdjudicationRequest) -> AgentResult<Adjudication> {
        let body = serde_json::to_string_pretty(request)
            .map_err(|e| AgentError::Request(e.to_string()))?;
        let content = complete(&self.http, &self.endpoint, ADJUDICATION_PROMPT, body).await?;
        Ok(Adjudication {
            records: parse_agent_output(ADJUDICATOR_AGENT, &content)?,
            notes: parse_notes(&content),
        })
    }
}

/// Where the final biomarkers came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ConsensusSource {
    Adjudicated { adjudicator: String },
    Statistical { reason: String },
}

/// Final output after the optional adjudication pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjudicatedOutput {
    #[serde(flatten)]
    pub output: ConsensusOutput,
    pub consensus_source: ConsensusSource,
    pub notes: Vec<String>,
}

impl AdjudicatedOutput {
    pub fn is_adjudicated(&self) -> bool {
        matches!(self.consensus_source, ConsensusSource::Adjudicated { .. })
    }

    fn statistical(report: &ConsensusReport, reason: String) -> Self {
        warn!(reason = %reason, "Falling back to statistical consensus");
        Self {
            output: report.to_output(),
            consensus_source: ConsensusSource::Statistical { reason },
            notes: report.notes.clone(),
        }
    }
}

fn entry_from(record: NormalizedRecord) -> Option<BiomarkerEntry> {
    let value = match (record.numeric_value, record.qualifier, record.text_value) {
        (Some(value), Some(qualifier), _) => ConsensusValue::Qualified { qualifier, value },
        (Some(value), None, _) => ConsensusValue::Numeric(value),
        (None, _, Some(text)) => ConsensusValue::Text(text),
        (None, _, None) => return None,
    };
    Some(BiomarkerEntry {
        test_name: record.display_name,
        value,
        unit: record.unit,
        reference_range: record.reference_range.map(|r| r.display()),
    })
}

/// Run the adjudicator under `deadline`, falling back to the statistical
/// output on any failure.
pub async fn adjudicate_or_fallback(
    adjudicator: &dyn Adjudicator,
    batch: &ExtractionBatch,
    report: &ConsensusReport,
    normalizer: &Normalizer,
    deadline: Duration,
) -> AdjudicatedOutput {
    if report.is_total_failure() {
        return AdjudicatedOutput::statistical(report, "no usable extractions".to_string());
    }

    let request = AdjudicationRequest::new(batch, report);
    let adjudication =
        match tokio::time::timeout(deadline, adjudicator.adjudicate(&request)).await {
            Ok(Ok(adjudication)) => adjudication,
            Ok(Err(e)) => {
                return AdjudicatedOutput::statistical(
                    report,
                    format!("adjudicator '{}' failed: {}", adjudicator.id(), e),
                )
            }
            Err(_) => {
                return AdjudicatedOutput::statistical(
                    report,
                    format!("adjudicator '{}' timed out after {:?}", adjudicator.id(), deadline),
                )
            }
        };

    let known: HashSet<String> = request
        .extractions
        .iter()
        .flat_map(|(agent, records)| normalizer.normalize_all(agent, records))
        .map(|r| r.canonical_name)
        .collect();

    let mut notes = adjudication.notes;
    let mut seen = HashSet::new();
    let mut biomarkers = Vec::new();
    for raw in &adjudication.records {
        let record = normalizer.normalize(ADJUDICATOR_AGENT, raw);
        if !known.contains(&record.canonical_name) {
            notes.push(format!("Dropped adjudicated '{}': no agent reported it", raw.test_name));
            continue;
        }
        if !seen.insert(record.canonical_name.clone()) {
            continue;
        }
        let name = raw.test_name.clone();
        match entry_from(record) {
            Some(entry) => biomarkers.push(entry),
            None => notes.push(format!("Dropped adjudicated '{}': no value", name)),
        }
    }

    if biomarkers.is_empty() {
        return AdjudicatedOutput::statistical(
            report,
            format!("adjudicator '{}' returned no usable biomarkers", adjudicator.id()),
        );
    }

    info!(
        adjudicator = adjudicator.id(),
        biomarkers = biomarkers.len(),
        statistical = report.records.len(),
        "Adjudication accepted"
    );

    let statistical = report.to_output();
    AdjudicatedOutput {
        output: ConsensusOutput {
            biomarkers,
            statistics: statistical.statistics,
            metadata: statistical.metadata,
        },
        consensus_source: ConsensusSource::Adjudicated {
            adjudicator: adjudicator.id().to_string(),
        },
        notes,
    }
}
