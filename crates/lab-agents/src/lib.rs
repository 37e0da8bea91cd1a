//! Biomarker extraction agents
//!
//! Runs several independent extraction agents over one lab report and hands
//! their outcomes to the [`consensus`] engine.
//!
//! ```text
//! LabDocument ─► ExtractionOrchestrator ─► ExtractionBatch ─► ConsensusEngine
//!                 (JoinSet, timeouts)                          ─► ConsensusOutput ─► CSV
//!                                                                   │
//!                                               optional Adjudicator (falls back to it)
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod accuracy;
pub mod adjudicate;
pub mod agents;
pub mod config;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod parse;

pub use accuracy::{compare, compare_files, AccuracyReport, FieldMismatch};
pub use adjudicate::{
    adjudicate_or_fallback, AdjudicatedOutput, Adjudication, AdjudicationRequest, Adjudicator,
    ChatAdjudicator, ConsensusSource,
};
pub use agents::{ChatCompletionAgent, ExtractionAgent, LabDocument, ReplayAgent, SharedAgent};
pub use config::{AgentsConfig, EndpointConfig};
pub use error::{AgentError, AgentResult, CsvError};
pub use export::{csv_row, write_csv, write_csv_file};
pub use orchestrator::{ExtractionOrchestrator, ExtractionRun};
pub use parse::{parse_agent_output, parse_notes, UNKNOWN_TEST_NAME};
