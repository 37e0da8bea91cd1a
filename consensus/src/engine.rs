//! Consensus engine - runs the full pipeline for one document
//!
//! ```text
//! ExtractionBatch
//!   │  tally agents, record failures
//!   ▼
//! Normalizer ─► RecordMatcher ─► ConsensusResolver ─► ResultValidator
//!   ▼
//! DocumentStatistics ─► ConsensusReport
//! ```
//!
//! The engine is immutable after construction, so one instance can be
//! shared across threads and reconcile independent documents in parallel.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::error::ConsensusResult;
use crate::events::QualityEvent;
use crate::matcher::RecordMatcher;
use crate::normalize::Normalizer;
use crate::report::ConsensusReport;
use crate::resolver::{
    AgentReliability, ConsensusResolver, OmissionReason, Resolution, ResolutionContext,
};
use crate::statistics::{DocumentStatistics, StatisticsInputs};
use crate::types::{AgentFailureKind, AgentOutcome, ExtractionBatch, NormalizedRecord};
use crate::validator::ResultValidator;

/// Shared reference to a [`ConsensusEngine`]
pub type SharedConsensusEngine = Arc<ConsensusEngine>;

/// Multi-agent biomarker consensus engine
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: Arc<ConsensusConfig>,
    normalizer: Normalizer,
    matcher: RecordMatcher,
    resolver: ConsensusResolver,
    validator: ResultValidator,
    reliability: Option<AgentReliability>,
}

impl ConsensusEngine {
    /// Build an engine, rejecting invalid configuration.
    pub fn new(config: ConsensusConfig) -> ConsensusResult<Self> {
        config.validate()?;
        let normalizer = Normalizer::new(&config);
        let resolver = ConsensusResolver::new(&config, normalizer.units().clone());
        Ok(Self {
            matcher: RecordMatcher::new(config.similarity_threshold),
            validator: ResultValidator::new(&config),
            normalizer,
            resolver,
            reliability: None,
            config: Arc::new(config),
        })
    }

    /// Attach historical per-agent agreement rates used to break ties.
    pub fn with_reliability(mut self, reliability: AgentReliability) -> Self {
        self.reliability = (!reliability.is_empty()).then_some(reliability);
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Reconcile one document's agent outcomes.
    ///
    /// Never fails: agent failures, degraded fields, omitted groups and
    /// rejected records are all reported inside the returned report.
    pub fn reconcile(&self, batch: &ExtractionBatch) -> ConsensusReport {
        let tally = batch.tally();
        let mut events = Vec::new();

        info!(
            total_models = tally.total_models,
            successful_models = tally.successful_models,
            "Starting consensus"
        );

        for (agent_id, outcome) in &batch.outcomes {
            let failure = match outcome {
                AgentOutcome::Failed { kind, detail } => Some((*kind, detail.clone())),
                AgentOutcome::Success { records } if records.is_empty() => {
                    Some((AgentFailureKind::Empty, "no biomarkers returned".to_string()))
                }
                AgentOutcome::Success { .. } => None,
            };
            if let Some((kind, detail)) = failure {
                warn!(
                    agent = %agent_id,
                    kind = %kind,
                    detail = %detail,
                    "Agent produced no usable output"
                );
                events.push(QualityEvent::AgentFailed {
                    agent_id: agent_id.clone(),
                    kind,
                    detail,
                });
            }
        }

        if tally.is_total_failure() {
            warn!(
                total_models = tally.total_models,
                "Total extraction failure: no agent produced usable output"
            );
            events.push(QualityEvent::TotalFailure {
                total_models: tally.total_models,
                successful_models: tally.successful_models,
            });
            return ConsensusReport::assemble(
                Vec::new(),
                Vec::new(),
                Vec::new(),
                events,
                DocumentStatistics::total_failure(tally),
            );
        }

        let normalized = self.normalize_batch(batch, &mut events);
        let groups = self.matcher.group(normalized);
        let group_sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();

        let ctx = ResolutionContext {
            total_models: tally.total_models,
            reliability: self.reliability.as_ref(),
        };
        let mut accepted = Vec::new();
        let mut omissions = Vec::new();
        for group in &groups {
            match self.resolver.resolve(group, &ctx) {
                Resolution::Accepted(record) => accepted.push(record),
                Resolution::Omitted(omission) => omissions.push(omission),
            }
        }

        let validation = self.validator.validate(accepted);
        for demotion in &validation.demotions {
            events.push(QualityEvent::RecordDemoted {
                test_name: demotion.test_name.clone(),
                flags: demotion.flags.clone(),
                confidence: demotion.confidence,
            });
        }
        for rejection in &validation.rejections {
            events.push(QualityEvent::RecordRejected {
                test_name: rejection.test_name.clone(),
                reason: rejection.reason.clone(),
            });
        }
        omissions.extend(validation.demoted);
        for omission in &omissions {
            events.push(QualityEvent::GroupOmitted {
                key: omission.key.clone(),
                reason: omission.reason,
                agreement_count: omission.agreement_count,
            });
        }

        let statistics = DocumentStatistics::compute(StatisticsInputs {
            tally,
            min_agreement_count: self.config.min_agreement_count,
            group_sizes: &group_sizes,
            records: &validation.records,
            omissions: &omissions,
            rejected_records: validation.rejections.len(),
        });

        info!(
            records = validation.records.len(),
            omitted = omissions.len(),
            low_agreement = omissions
                .iter()
                .filter(|o| o.reason == OmissionReason::InsufficientAgreement)
                .count(),
            rejected = validation.rejections.len(),
            success_rate = statistics.extraction_success_rate,
            confidence = statistics.consensus_confidence,
            "Consensus complete"
        );

        ConsensusReport::assemble(
            validation.records,
            omissions,
            validation.rejections,
            events,
            statistics,
        )
    }

    /// Normalize every usable agent's records in agent order.
    fn normalize_batch(
        &self,
        batch: &ExtractionBatch,
        events: &mut Vec<QualityEvent>,
    ) -> Vec<NormalizedRecord> {
        let mut normalized = Vec::new();
        for (agent_id, outcome) in &batch.outcomes {
            let AgentOutcome::Success { records } = outcome else {
                continue;
            };
            for record in self.normalizer.normalize_all(agent_id, records) {
                if record.quality.is_degraded() {
                    events.push(QualityEvent::NormalizationDegraded {
                        agent_id: agent_id.clone(),
                        test_name: record.raw.test_name.clone(),
                        weight: record.quality.weight,
                        issues: record.quality.issues.clone(),
                    });
                }
                normalized.push(record);
            }
        }
        debug!(records = normalized.len(), "Normalized batch");
        normalized
    }
}
