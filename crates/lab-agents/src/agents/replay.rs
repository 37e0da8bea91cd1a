//! Replay agent - serves a previously saved extraction
//!
//! Raw outputs are stored one file per agent as `<dir>/<agent_id>.json`, in
//! the same `{"biomarkers": [...]}` shape the models are asked for, so a
//! document can be reconciled again offline with different settings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use consensus::RawBiomarkerRecord;
use serde::Serialize;
use tracing::debug;

use super::{ExtractionAgent, LabDocument};
use crate::error::{AgentError, AgentResult};
use crate::parse::parse_agent_output;

#[derive(Debug, Clone)]
pub struct ReplayAgent {
    id: String,
    path: PathBuf,
}

impl ReplayAgent {
    /// Agent `id` replaying `<dir>/<id>.json`.
    pub fn new(id: &str, dir: &Path) -> Self {
        Self {
            id: id.to_string(),
            path: dir.join(format!("{}.json", id)),
        }
    }

    /// One agent per `*.json` file in `dir`, ordered by id.
    pub fn discover(dir: &Path) -> AgentResult<Vec<Self>> {
        let io_err = |source: std::io::Error| AgentError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut agents = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                agents.push(Self::new(stem, dir));
            }
        }
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ExtractionAgent for ReplayAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(&self, document: &LabDocument) -> AgentResult<Vec<RawBiomarkerRecord>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| AgentError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            agent = %self.id,
            document = %document.id,
            path = %self.path.display(),
            "Replaying saved extraction"
        );
        parse_agent_output(&self.id, &text)
    }
}

#[derive(Serialize)]
struct SavedExtraction<'a> {
    biomarkers: &'a [RawBiomarkerRecord],
}

/// Save one agent's records where [`ReplayAgent`] will find them.
pub fn save_extraction(
    dir: &Path,
    agent_id: &str,
    records: &[RawBiomarkerRecord],
) -> AgentResult<PathBuf> {
    let path = dir.join(format!("{}.json", agent_id));
    let json = serde_json::to_string_pretty(&SavedExtraction {
        biomarkers: records,
    })
    .map_err(|e| AgentError::Malformed(e.to_string()))?;
    std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&path, json))
        .map_err(|source| AgentError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}
