//! Multi-agent biomarker consensus
//!
//! Several independent extraction agents read the same lab report. Each one
//! returns biomarker records or fails. This crate reconciles whatever came
//! back into one canonical set of biomarkers with per-record confidence and
//! document-level agreement statistics.
//!
//! # Pipeline
//!
//! ```text
//! ExtractionBatch (agent_id → Success(records) | Failed(kind))
//!   │
//!   ├─ normalize   names → canonical names, text → numbers + units, ranges → bounds
//!   ├─ matcher     same biomarker across agents → MatchGroup (a partition)
//!   ├─ resolver    unit conversion, clustering, confidence → record | omission
//!   ├─ validator   plausibility, range order, unit presence → demote | reject
//!   └─ statistics  success rate, mean confidence, model agreement
//!   │
//!   ▼
//! ConsensusReport ─► ConsensusOutput (compact JSON form)
//! ```
//!
//! Everything here is synchronous and deterministic. The same batch and
//! configuration always produce the same records, in the same order.
//!
//! # Usage
//!
//! ```no_run
//! use consensus::{
//!     AgentOutcome, ConsensusConfig, ConsensusEngine, ExtractionBatch, RawBiomarkerRecord,
//! };
//!
//! let engine = ConsensusEngine::new(ConsensusConfig::default())?;
//! let batch = ExtractionBatch::new()
//!     .with_outcome("a", AgentOutcome::success(vec![
//!         RawBiomarkerRecord::new("a", "Hemoglobin", 13.5).with_unit("g/dL"),
//!     ]))
//!     .with_outcome("b", AgentOutcome::success(vec![
//!         RawBiomarkerRecord::new("b", "Hgb", "135 g/L"),
//!     ]));
//! let output = engine.reconcile(&batch).to_output();
//! println!("{}", serde_json::to_string_pretty(&output)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod matcher;
pub mod normalize;
pub mod report;
pub mod resolver;
pub mod statistics;
pub mod types;
pub mod validator;

// Re-export key types
pub use config::{
    CentralStatistic, ClusteringPolicy, ConsensusConfig, PlausibilityBand, UnitConversion,
};
pub use engine::{ConsensusEngine, SharedConsensusEngine};
pub use error::{ConfigError, ConsensusError, ConsensusResult};
pub use events::{QualityEvent, Severity};
pub use matcher::{name_similarity, MatchGroup, RecordMatcher};
pub use normalize::Normalizer;
pub use report::{BiomarkerEntry, ConsensusOutput, ConsensusReport, ReportStatus};
pub use resolver::{
    AgentReliability, ConsensusRecord, ConsensusResolver, Omission, OmissionReason, Resolution,
    ResolutionContext, ValueBasis,
};
pub use statistics::DocumentStatistics;
pub use types::{
    AgentFailureKind, AgentOutcome, AgentTally, ConsensusValue, ExtractionBatch,
    NormalizationIssue, NormalizationQuality, NormalizedRecord, Qualifier, RawBiomarkerRecord,
    RawValue, ReferenceRange,
};
pub use validator::{Rejection, RejectionReason, ResultValidator, ValidationFlag};
