//! Extraction agents
//!
//! An agent reads one lab document and returns raw biomarker records, or
//! fails. Agents know nothing about each other or about consensus; the
//! orchestrator runs them side by side and the core reconciles the results.
//!
//! - [`ChatCompletionAgent`]: one request to an OpenAI-compatible endpoint
//! - [`ReplayAgent`]: re-reads a saved extraction from disk

pub mod chat;
pub mod replay;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use consensus::RawBiomarkerRecord;

use crate::error::{AgentError, AgentResult};

pub use chat::ChatCompletionAgent;
pub use replay::ReplayAgent;

/// One lab report as plain text
#[derive(Debug, Clone, PartialEq)]
pub struct LabDocument {
    pub id: String,
    pub text: String,
}

impl LabDocument {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    /// Read a text document; the id is the file stem.
    pub fn from_file(path: &Path) -> AgentResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AgentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Ok(Self { id, text })
    }
}

/// Something that can extract biomarkers from a document
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    /// Stable agent id; becomes the key in the extraction batch
    fn id(&self) -> &str;

    async fn extract(&self, document: &LabDocument) -> AgentResult<Vec<RawBiomarkerRecord>>;
}

pub type SharedAgent = Arc<dyn ExtractionAgent>;
