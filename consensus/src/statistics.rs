//! Agreement Statistics - document-level quality summary

use serde::{Deserialize, Serialize};

use crate::resolver::{ConsensusRecord, Omission};
use crate::types::AgentTally;

/// Extraction quality for one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatistics {
    /// successful_models / total_models
    pub extraction_success_rate: f64,
    /// Mean confidence of emitted records
    pub consensus_confidence: f64,
    /// Mean share of successful agents per group that met the agreement count
    pub model_agreement: f64,
    pub total_models: usize,
    pub successful_models: usize,
    pub groups_total: usize,
    pub groups_meeting_agreement: usize,
    pub omitted_low_agreement: usize,
    pub omitted_low_confidence: usize,
    pub rejected_records: usize,
    /// groups_meeting_agreement / groups_total
    pub group_coverage: f64,
    pub total_failure: bool,
}

/// Everything the statistics engine reads
#[derive(Debug, Clone, Copy)]
pub struct StatisticsInputs<'a> {
    pub tally: AgentTally,
    pub min_agreement_count: usize,
    /// Agreement count of every match group
    pub group_sizes: &'a [usize],
    pub records: &'a [ConsensusRecord],
    pub omissions: &'a [Omission],
    pub rejected_records: usize,
}

impl DocumentStatistics {
    /// All-zero statistics for a document where no agent succeeded.
    pub fn total_failure(tally: AgentTally) -> Self {
        Self {
            total_models: tally.total_models,
            successful_models: tally.successful_models,
            total_failure: true,
            ..Self::default()
        }
    }

    pub fn compute(inputs: StatisticsInputs<'_>) -> Self {
        let tally = inputs.tally;
        if tally.is_total_failure() {
            return Self::total_failure(tally);
        }

        let extraction_success_rate = tally.successful_models as f64 / tally.total_models as f64;

        let consensus_confidence = if inputs.records.is_empty() {
            0.0
        } else {
            inputs.records.iter().map(|r| r.confidence).sum::<f64>() / inputs.records.len() as f64
        };

        let agreeing: Vec<usize> = inputs
            .group_sizes
            .iter()
            .copied()
            .filter(|&n| n >= inputs.min_agreement_count)
            .collect();
        let model_agreement = if agreeing.is_empty() {
            0.0
        } else {
            let successful = tally.successful_models as f64;
            agreeing
                .iter()
                .map(|&n| (n as f64 / successful).min(1.0))
                .sum::<f64>()
                / agreeing.len() as f64
        };

        let groups_total = inputs.group_sizes.len();
        let group_coverage = if groups_total == 0 {
            0.0
        } else {
            agreeing.len() as f64 / groups_total as f64
        };

        let omitted_low_agreement = inputs
            .omissions
            .iter()
            .filter(|o| o.reason.is_low_agreement())
            .count();

        Self {
            extraction_success_rate,
            consensus_confidence,
            model_agreement,
            total_models: tally.total_models,
            successful_models: tally.successful_models,
            groups_total,
            groups_meeting_agreement: agreeing.len(),
            omitted_low_agreement,
            omitted_low_confidence: inputs.omissions.len() - omitted_low_agreement,
            rejected_records: inputs.rejected_records,
            group_coverage,
            total_failure: false,
        }
    }
}
