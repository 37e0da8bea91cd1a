use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use consensus::{ConsensusEngine, ConsensusReport, ExtractionBatch, Normalizer};
use lab_agents::agents::replay::save_extraction;
use lab_agents::{
    adjudicate_or_fallback, compare_files, write_csv_file, AdjudicatedOutput, AgentsConfig,
    ChatAdjudicator, ChatCompletionAgent, ExtractionOrchestrator, LabDocument, ReplayAgent,
};
use tracing::info;

/// Multi-agent biomarker extraction and consensus
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to agents.toml (overrides LAB_AGENTS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a saved extraction batch (JSON)
    Reconcile {
        batch: PathBuf,
        /// Print the detailed report instead of the compact output
        #[arg(long, default_value_t = false)]
        detailed: bool,
        /// Also write the biomarkers as a one-row CSV
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Ask the configured [adjudicator] to review the consensus
        #[arg(long, default_value_t = false)]
        adjudicate: bool,
    },
    /// Run the configured agents over a text document and reconcile
    Extract {
        document: PathBuf,
        /// Replay saved `<agent>.json` outputs from this directory instead of calling endpoints
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Save each agent's raw records to this directory
        #[arg(long)]
        save_raw: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        detailed: bool,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        adjudicate: bool,
    },
    /// Compare an extracted CSV with a reference CSV
    Verify { actual: PathBuf, extracted: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AgentsConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Reconcile {
            batch,
            detailed,
            csv,
            adjudicate,
        } => {
            let content = std::fs::read_to_string(&batch)
                .with_context(|| format!("Failed to read batch {}", batch.display()))?;
            let batch: ExtractionBatch =
                serde_json::from_str(&content).context("Invalid extraction batch JSON")?;
            let report = engine(&config)?.reconcile(&batch);
            let options = OutputOptions {
                detailed,
                csv: csv.as_deref(),
                adjudicate,
            };
            emit(&config, &batch, &report, &options).await
        }
        Command::Extract {
            document,
            replay,
            save_raw,
            detailed,
            csv,
            adjudicate,
        } => {
            let document = LabDocument::from_file(&document)?;
            let orchestrator = orchestrator(&config, replay.as_deref())?;
            if orchestrator.is_empty() {
                bail!("No agents configured: add [[endpoints]] to the config or pass --replay");
            }

            let run = orchestrator.run(&document).await;
            info!(
                document = %run.document_id,
                duration_ms = run.duration().num_milliseconds(),
                "Extraction complete"
            );

            if let Some(dir) = save_raw.as_deref() {
                for (agent_id, outcome) in &run.batch.outcomes {
                    if let consensus::AgentOutcome::Success { records } = outcome {
                        let path = save_extraction(dir, agent_id, records)?;
                        info!(agent = %agent_id, path = %path.display(), "Saved raw extraction");
                    }
                }
            }

            let report = engine(&config)?.reconcile(&run.batch);
            let options = OutputOptions {
                detailed,
                csv: csv.as_deref(),
                adjudicate,
            };
            emit(&config, &run.batch, &report, &options).await
        }
        Command::Verify { actual, extracted } => {
            let report = compare_files(&actual, &extracted)?;
            info!(
                accuracy = %format!("{:.2}%", report.accuracy_pct),
                mismatches = report.mismatches.len(),
                "Accuracy check complete"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn engine(config: &AgentsConfig) -> Result<ConsensusEngine> {
    ConsensusEngine::new(config.consensus.clone()).context("Failed to build consensus engine")
}

fn orchestrator(config: &AgentsConfig, replay: Option<&Path>) -> Result<ExtractionOrchestrator> {
    let mut orchestrator =
        ExtractionOrchestrator::new(config.timeout()).with_max_retries(config.max_retries);

    match replay {
        Some(dir) => {
            for agent in ReplayAgent::discover(dir)? {
                orchestrator = orchestrator.with_agent(agent);
            }
        }
        None => {
            let http = http_client(config)?;
            for endpoint in &config.endpoints {
                info!(
                    agent = %endpoint.id,
                    url = %endpoint.url,
                    model = %endpoint.model,
                    "Registering endpoint"
                );
                let agent = ChatCompletionAgent::new(endpoint.clone(), http.clone());
                orchestrator = orchestrator.with_agent(agent);
            }
        }
    }
    Ok(orchestrator)
}

fn http_client(config: &AgentsConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .context("Failed to build HTTP client")
}

struct OutputOptions<'a> {
    detailed: bool,
    csv: Option<&'a Path>,
    adjudicate: bool,
}

async fn adjudicate(
    config: &AgentsConfig,
    batch: &ExtractionBatch,
    report: &ConsensusReport,
) -> Result<AdjudicatedOutput> {
    let Some(endpoint) = config.adjudicator.clone() else {
        bail!("--adjudicate needs an [adjudicator] endpoint in the config");
    };
    info!(adjudicator = %endpoint.id, model = %endpoint.model, "Adjudicating consensus");
    let adjudicator = ChatAdjudicator::new(endpoint, http_client(config)?);
    let normalizer = Normalizer::new(&config.consensus);
    Ok(adjudicate_or_fallback(&adjudicator, batch, report, &normalizer, config.timeout()).await)
}

async fn emit(
    config: &AgentsConfig,
    batch: &ExtractionBatch,
    report: &ConsensusReport,
    options: &OutputOptions<'_>,
) -> Result<()> {
    for note in &report.notes {
        info!(status = %report.status, "{}", note);
    }

    let adjudicated = if options.adjudicate {
        Some(adjudicate(config, batch, report).await?)
    } else {
        None
    };
    let output = adjudicated
        .as_ref()
        .map_or_else(|| report.to_output(), |a| a.output.clone());

    if let Some(path) = options.csv {
        write_csv_file(&output, path)
            .with_context(|| format!("Failed to write CSV {}", path.display()))?;
        info!(path = %path.display(), "Wrote CSV");
    }

    let json = match (&adjudicated, options.detailed) {
        (_, true) => serde_json::to_string_pretty(report)?,
        (Some(adjudicated), false) => serde_json::to_string_pretty(adjudicated)?,
        (None, false) => serde_json::to_string_pretty(&output)?,
    };
    println!("{}", json);

    if report.is_total_failure() {
        bail!("Total extraction failure: no agent produced usable output");
    }
    Ok(())
}
