//! Extraction orchestrator - concurrent fan-out over agents
//!
//! ```text
//! LabDocument
//!   │
//!   ├─ JoinSet::spawn(agent_1) ─┐
//!   ├─ JoinSet::spawn(agent_2) ─┼─ per-agent timeout, retries, panic capture
//!   └─ JoinSet::spawn(agent_n) ─┘
//!   ▼
//! ExtractionBatch (one outcome per agent, declared_total = n)
//! ```
//!
//! ## Failure policy
//!
//! Every agent ends up in the batch. A panic becomes `crashed`, an elapsed
//! deadline `timed_out`, unparseable output `malformed` and an empty list
//! `empty`. The orchestrator itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use consensus::{AgentFailureKind, AgentOutcome, ExtractionBatch, RawBiomarkerRecord};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agents::{ExtractionAgent, LabDocument, SharedAgent};
use crate::error::{AgentError, AgentResult};

/// Outcome of one orchestrated extraction
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    pub document_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall time per agent in milliseconds
    pub agent_millis: BTreeMap<String, u64>,
    pub batch: ExtractionBatch,
}

impl ExtractionRun {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct ExtractionOrchestrator {
    agents: Vec<SharedAgent>,
    timeout: Duration,
    max_retries: u32,
}

impl ExtractionOrchestrator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agents: Vec::new(),
            timeout,
            max_retries: 0,
        }
    }

    pub fn with_agent(mut self, agent: impl ExtractionAgent + 'static) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn add(&mut self, agent: SharedAgent) {
        self.agents.push(agent);
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Run every agent on `document` concurrently.
    pub async fn run(&self, document: &LabDocument) -> ExtractionRun {
        let started_at = Utc::now();
        let document = Arc::new(document.clone());
        let mut join_set: JoinSet<(String, AgentOutcome, u64)> = JoinSet::new();

        info!(
            document = %document.id,
            agents = self.agents.len(),
            timeout_secs = self.timeout.as_secs(),
            "Starting extraction"
        );

        for agent in &self.agents {
            let agent = agent.clone();
            let document = document.clone();
            let timeout = self.timeout;
            let max_retries = self.max_retries;

            join_set.spawn(async move {
                let id = agent.id().to_string();
                let start = Instant::now();
                let outcome = run_agent(agent, document, timeout, max_retries).await;
                (id, outcome, start.elapsed().as_millis() as u64)
            });
        }

        let mut batch = ExtractionBatch::new().with_declared_total(self.agents.len());
        let mut agent_millis = BTreeMap::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((id, outcome, millis)) => {
                    match &outcome {
                        AgentOutcome::Success { records } => {
                            debug!(
                                agent = %id,
                                records = records.len(),
                                elapsed_ms = millis,
                                "Agent succeeded"
                            );
                        }
                        AgentOutcome::Failed { kind, detail } => {
                            warn!(
                                agent = %id,
                                kind = %kind,
                                detail = %detail,
                                elapsed_ms = millis,
                                "Agent failed"
                            );
                        }
                    }
                    agent_millis.insert(id.clone(), millis);
                    batch.insert(&id, outcome);
                }
                Err(e) => {
                    // The wrapper task itself died; the agent still counts via declared_total
                    warn!(error = %e, "agent wrapper task failed");
                }
            }
        }

        let finished_at = Utc::now();
        let tally = batch.tally();
        info!(
            document = %document.id,
            total = tally.total_models,
            successful = tally.successful_models,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Extraction finished"
        );

        ExtractionRun {
            document_id: document.id.clone(),
            started_at,
            finished_at,
            agent_millis,
            batch,
        }
    }
}

/// Run one agent under a deadline covering every attempt.
async fn run_agent(
    agent: SharedAgent,
    document: Arc<LabDocument>,
    timeout: Duration,
    max_retries: u32,
) -> AgentOutcome {
    let id = agent.id().to_string();
    let mut task = tokio::spawn(attempt_with_retries(agent, document, max_retries));

    let result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => {
            Err(AgentError::Panicked(panic_message(join_err)))
        }
        Ok(Err(join_err)) => Err(AgentError::Panicked(join_err.to_string())),
        Err(_) => {
            task.abort();
            Err(AgentError::Timeout(timeout))
        }
    };

    match result {
        Ok(records) if records.is_empty() => {
            AgentOutcome::failed(AgentFailureKind::Empty, AgentError::Empty.to_string())
        }
        Ok(records) => AgentOutcome::success(
            records
                .into_iter()
                .map(|r| RawBiomarkerRecord {
                    agent_id: id.clone(),
                    ..r
                })
                .collect(),
        ),
        Err(e) => AgentOutcome::failed(e.failure_kind(), e.to_string()),
    }
}

async fn attempt_with_retries(
    agent: SharedAgent,
    document: Arc<LabDocument>,
    max_retries: u32,
) -> AgentResult<Vec<RawBiomarkerRecord>> {
    let mut attempt = 0;
    loop {
        match agent.extract(&document).await {
            Err(e) if e.is_retriable() && attempt < max_retries => {
                attempt += 1;
                debug!(agent = agent.id(), attempt, error = %e, "Retrying agent");
            }
            result => return result,
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
