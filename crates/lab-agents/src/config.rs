//! Agent and pipeline configuration
//!
//! ```toml
//! timeout_secs = 90
//! max_retries = 1
//!
//! [[endpoints]]
//! id = "local_qwen"
//! url = "http://localhost:8080/v1"
//! model = "qwen2.5-14b-instruct"
//!
//! [[endpoints]]
//! id = "cloud_gpt"
//! url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [adjudicator]
//! id = "judge"
//! url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [consensus]
//! confidence_threshold = 0.75
//! ```
//!
//! The file comes from `--config` or `LAB_AGENTS_CONFIG`. Environment
//! overrides (`LAB_AGENTS_TIMEOUT_SECS`, `CONSENSUS_*`) are applied last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use consensus::ConsensusConfig;
use serde::{Deserialize, Serialize};

/// One OpenAI-compatible chat-completion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Agent id used in the extraction batch
    pub id: String,
    /// Base URL, e.g. `http://localhost:8080/v1`
    pub url: String,
    pub model: String,
    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4096
}

impl EndpointConfig {
    pub fn new(id: &str, url: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            model: model.to_string(),
            api_key_env: None,
            max_tokens: default_max_tokens(),
        }
    }

    /// Bearer token from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

/// Top-level configuration for the agents binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Per-agent deadline covering every attempt
    pub timeout_secs: u64,
    /// Extra attempts after a retriable failure
    pub max_retries: u32,
    pub endpoints: Vec<EndpointConfig>,
    /// Endpoint for the optional adjudication pass
    pub adjudicator: Option<EndpointConfig>,
    pub consensus: ConsensusConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_retries: 1,
            endpoints: Vec::new(),
            adjudicator: None,
            consensus: ConsensusConfig::default(),
        }
    }
}

impl AgentsConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse agents config")
    }

    /// Load from `path`, else `LAB_AGENTS_CONFIG`, else defaults; then apply
    /// environment overrides and validate the consensus section.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("LAB_AGENTS_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config
            .consensus
            .validate()
            .context("Invalid [consensus] configuration")?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = std::env::var("LAB_AGENTS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.timeout_secs = secs;
        }
        self.consensus.apply_env_overrides();
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
