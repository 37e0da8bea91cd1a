//! Data-quality events
//!
//! Every degradation the pipeline absorbs instead of failing is recorded
//! here so a report explains why its output is smaller than its input.
//! Events carry no timestamps; the enclosing report has one.

use serde::{Deserialize, Serialize};

use crate::resolver::OmissionReason;
use crate::types::{AgentFailureKind, NormalizationIssue};
use crate::validator::{RejectionReason, ValidationFlag};

/// Severity used when rendering notes and choosing a log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One data-quality event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityEvent {
    /// An agent produced no usable output
    AgentFailed {
        agent_id: String,
        kind: AgentFailureKind,
        detail: String,
    },

    /// A record was kept with reduced weight
    NormalizationDegraded {
        agent_id: String,
        test_name: String,
        weight: f64,
        issues: Vec<NormalizationIssue>,
    },

    /// A match group did not become a record
    GroupOmitted {
        key: String,
        reason: OmissionReason,
        agreement_count: usize,
    },

    /// An accepted record lost confidence in validation
    RecordDemoted {
        test_name: String,
        flags: Vec<ValidationFlag>,
        confidence: f64,
    },

    /// An accepted record was excluded as structurally incoherent
    RecordRejected {
        test_name: String,
        reason: RejectionReason,
    },

    /// No agent produced usable output
    TotalFailure {
        total_models: usize,
        successful_models: usize,
    },
}

impl QualityEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentFailed { .. } => "agent_failed",
            Self::NormalizationDegraded { .. } => "normalization_degraded",
            Self::GroupOmitted { .. } => "group_omitted",
            Self::RecordDemoted { .. } => "record_demoted",
            Self::RecordRejected { .. } => "record_rejected",
            Self::TotalFailure { .. } => "total_failure",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::NormalizationDegraded { .. } | Self::GroupOmitted { .. } => Severity::Info,
            Self::AgentFailed { .. } | Self::RecordDemoted { .. } | Self::RecordRejected { .. } => {
                Severity::Warning
            }
            Self::TotalFailure { .. } => Severity::Critical,
        }
    }
}

impl std::fmt::Display for QualityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentFailed {
                agent_id,
                kind,
                detail,
            } => {
                if detail.is_empty() {
                    write!(f, "agent {} failed ({})", agent_id, kind)
                } else {
                    write!(f, "agent {} failed ({}): {}", agent_id, kind, detail)
                }
            }
            Self::NormalizationDegraded {
                agent_id,
                test_name,
                weight,
                issues,
            } => write!(
                f,
                "{} from {} kept at weight {:.2} ({} issue(s))",
                test_name,
                agent_id,
                weight,
                issues.len()
            ),
            Self::GroupOmitted {
                key,
                reason,
                agreement_count,
            } => write!(
                f,
                "{} omitted: {} ({} agent(s))",
                key, reason, agreement_count
            ),
            Self::RecordDemoted {
                test_name,
                flags,
                confidence,
            } => write!(
                f,
                "{} demoted to {:.2} by {} finding(s)",
                test_name,
                confidence,
                flags.len()
            ),
            Self::RecordRejected { test_name, reason } => {
                write!(f, "{} rejected: {:?}", test_name, reason)
            }
            Self::TotalFailure {
                total_models,
                successful_models,
            } => write!(
                f,
                "total extraction failure: {} of {} agents usable",
                successful_models, total_models
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = QualityEvent::AgentFailed {
            agent_id: "gpt4_vision".into(),
            kind: AgentFailureKind::TimedOut,
            detail: "no answer in 60s".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"agent_failed\""));
        assert!(json.contains("\"kind\":\"timed_out\""));

        let back: QualityEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_severity_and_type() {
        let event = QualityEvent::TotalFailure {
            total_models: 3,
            successful_models: 0,
        };
        assert_eq!(event.severity(), Severity::Critical);
        assert_eq!(event.event_type(), "total_failure");
        assert_eq!(event.to_string(), "total extraction failure: 0 of 3 agents usable");
    }

    #[test]
    fn test_omission_display() {
        let event = QualityEvent::GroupOmitted {
            key: "ferritin".into(),
            reason: OmissionReason::InsufficientAgreement,
            agreement_count: 1,
        };
        assert_eq!(event.to_string(), "ferritin omitted: insufficient agreement (1 agent(s))");
        assert_eq!(event.severity(), Severity::Info);
    }
}
