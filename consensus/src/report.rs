//! Output boundary: the compact consensus output and the detailed report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, ConsensusResult};
use crate::events::{QualityEvent, Severity};
use crate::resolver::{ConsensusRecord, Omission};
use crate::statistics::DocumentStatistics;
use crate::types::ConsensusValue;
use crate::validator::Rejection;

/// One biomarker in the compact output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiomarkerEntry {
    pub test_name: String,
    pub value: ConsensusValue,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputStatistics {
    pub extraction_success_rate: f64,
    pub consensus_confidence: f64,
    pub model_agreement: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub total_models: usize,
    pub successful_models: usize,
}

/// Compact per-document result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusOutput {
    pub biomarkers: Vec<BiomarkerEntry>,
    pub statistics: OutputStatistics,
    pub metadata: OutputMetadata,
}

/// Overall outcome of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every agent succeeded and nothing was dropped
    Complete,
    /// Some agents failed or some groups were omitted or rejected
    Partial,
    /// No agent produced usable output
    TotalFailure,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Partial => write!(f, "partial"),
            Self::TotalFailure => write!(f, "total_failure"),
        }
    }
}

/// Detailed, auditable result of one reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusReport {
    /// Random v4 uuid
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub records: Vec<ConsensusRecord>,
    pub omissions: Vec<Omission>,
    pub rejections: Vec<Rejection>,
    pub events: Vec<QualityEvent>,
    pub statistics: DocumentStatistics,
    /// Human-readable summary of warnings and omissions
    pub notes: Vec<String>,
}

impl ConsensusReport {
    pub(crate) fn assemble(
        records: Vec<ConsensusRecord>,
        omissions: Vec<Omission>,
        rejections: Vec<Rejection>,
        events: Vec<QualityEvent>,
        statistics: DocumentStatistics,
    ) -> Self {
        let agents_failed = events
            .iter()
            .any(|e| matches!(e, QualityEvent::AgentFailed { .. }));
        let status = if statistics.total_failure {
            ReportStatus::TotalFailure
        } else if agents_failed || !omissions.is_empty() || !rejections.is_empty() {
            ReportStatus::Partial
        } else {
            ReportStatus::Complete
        };

        let notes = events
            .iter()
            .filter(|e| {
                e.severity() >= Severity::Warning || matches!(e, QualityEvent::GroupOmitted { .. })
            })
            .map(|e| e.to_string())
            .collect();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            status,
            records,
            omissions,
            rejections,
            events,
            statistics,
            notes,
        }
    }

    pub fn is_total_failure(&self) -> bool {
        self.status == ReportStatus::TotalFailure
    }

    /// Records by canonical name
    pub fn record(&self, canonical_name: &str) -> Option<&ConsensusRecord> {
        self.records.iter().find(|r| r.canonical_name == canonical_name)
    }

    /// Project onto the compact output format.
    pub fn to_output(&self) -> ConsensusOutput {
        ConsensusOutput {
            biomarkers: self
                .records
                .iter()
                .map(|r| BiomarkerEntry {
                    test_name: r.test_name.clone(),
                    value: r.value.clone(),
                    unit: r.unit.clone(),
                    reference_range: r.reference_range.as_ref().map(|rr| rr.display()),
                })
                .collect(),
            statistics: OutputStatistics {
                extraction_success_rate: self.statistics.extraction_success_rate,
                consensus_confidence: self.statistics.consensus_confidence,
                model_agreement: self.statistics.model_agreement,
            },
            metadata: OutputMetadata {
                total_models: self.statistics.total_models,
                successful_models: self.statistics.successful_models,
            },
        }
    }

    /// `Err(TotalFailure)` when no agent produced usable output.
    pub fn into_result(self) -> ConsensusResult<Self> {
        if self.is_total_failure() {
            return Err(ConsensusError::TotalFailure {
                total: self.statistics.total_models,
                successful: self.statistics.successful_models,
            });
        }
        Ok(self)
    }
}
