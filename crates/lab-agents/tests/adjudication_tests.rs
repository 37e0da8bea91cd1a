//! Adjudication pass with hand-written mock adjudicators

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use consensus::{
    AgentFailureKind, AgentOutcome, ConsensusConfig, ConsensusEngine, ConsensusReport,
    ConsensusValue, ExtractionBatch, Normalizer, RawBiomarkerRecord,
};
use lab_agents::{
    adjudicate_or_fallback, parse_agent_output, parse_notes, AdjudicatedOutput, Adjudication,
    AdjudicationRequest, Adjudicator, AgentError, AgentResult, ConsensusSource,
};

/// Answers with a canned model response run through the real parsers
struct ScriptedAdjudicator {
    response: String,
    seen_agents: Mutex<Vec<String>>,
}

impl ScriptedAdjudicator {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            seen_agents: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Adjudicator for ScriptedAdjudicator {
    fn id(&self) -> &str {
        "judge"
    }

    async fn adjudicate(&self, request: &AdjudicationRequest) -> AgentResult<Adjudication> {
        *self.seen_agents.lock().unwrap() = request.extractions.keys().cloned().collect();
        Ok(Adjudication {
            records: parse_agent_output("judge", &self.response)?,
            notes: parse_notes(&self.response),
        })
    }
}

struct FailingAdjudicator;

#[async_trait]
impl Adjudicator for FailingAdjudicator {
    fn id(&self) -> &str {
        "judge"
    }

    async fn adjudicate(&self, _request: &AdjudicationRequest) -> AgentResult<Adjudication> {
        Err(AgentError::Http {
            status: 503,
            body: "overloaded".into(),
        })
    }
}

struct HangingAdjudicator;

#[async_trait]
impl Adjudicator for HangingAdjudicator {
    fn id(&self) -> &str {
        "judge"
    }

    async fn adjudicate(&self, _request: &AdjudicationRequest) -> AgentResult<Adjudication> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(AgentError::Empty)
    }
}

fn batch() -> ExtractionBatch {
    let records = |agent: &str, wbc: f64| {
        vec![
            RawBiomarkerRecord::new(agent, "Hemoglobin", 13.5).with_unit("g/dL"),
            RawBiomarkerRecord::new(agent, "WBC Count", wbc).with_unit("10^3/uL"),
        ]
    };
    ExtractionBatch::new()
        .with_outcome("a", AgentOutcome::success(records("a", 6.1)))
        .with_outcome("b", AgentOutcome::success(records("b", 6.1)))
        .with_outcome("c", AgentOutcome::success(records("c", 61.0)))
        .with_outcome("d", AgentOutcome::failed(AgentFailureKind::TimedOut, "slow"))
}

fn reconcile(batch: &ExtractionBatch) -> (ConsensusReport, Normalizer) {
    let config = ConsensusConfig::default();
    let engine = ConsensusEngine::new(config.clone()).unwrap();
    (engine.reconcile(batch), Normalizer::new(&config))
}

async fn run(adjudicator: &dyn Adjudicator, batch: &ExtractionBatch) -> AdjudicatedOutput {
    let (report, normalizer) = reconcile(batch);
    adjudicate_or_fallback(adjudicator, batch, &report, &normalizer, Duration::from_secs(30)).await
}

#[tokio::test]
async fn test_adjudicated_biomarkers_replace_statistical_ones() {
    let judge = ScriptedAdjudicator::new(
        r#"```json
        {"biomarkers": [
            {"test_name": "Hemoglobin", "value": 13.5, "unit": "g/dl"},
            {"test_name": "WBC", "value": "6.1", "unit": "10^3/uL"},
        ],
         "notes": ["Agent c misplaced the decimal point in WBC"]}
        ```"#,
    );
    let batch = batch();
    let out = run(&judge, &batch).await;

    assert!(out.is_adjudicated());
    assert_eq!(
        out.consensus_source,
        ConsensusSource::Adjudicated {
            adjudicator: "judge".into()
        }
    );
    assert_eq!(out.output.biomarkers.len(), 2);
    assert_eq!(out.output.biomarkers[1].value, ConsensusValue::Numeric(6.1));
    assert_eq!(out.output.biomarkers[0].unit.as_deref(), Some("g/dL"));
    assert_eq!(out.notes, vec!["Agent c misplaced the decimal point in WBC"]);

    // Metadata stays with the deterministic report
    assert_eq!(out.output.metadata.total_models, 4);
    assert_eq!(out.output.metadata.successful_models, 3);
    assert_eq!(*judge.seen_agents.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_unreported_biomarkers_are_dropped() {
    let judge = ScriptedAdjudicator::new(
        r#"{"biomarkers": [
            {"test_name": "Hemoglobin", "value": 13.5, "unit": "g/dL"},
            {"test_name": "Vitamin D", "value": 30, "unit": "ng/mL"}
        ]}"#,
    );
    let out = run(&judge, &batch()).await;

    assert!(out.is_adjudicated());
    assert_eq!(out.output.biomarkers.len(), 1);
    assert_eq!(out.output.biomarkers[0].test_name, "Hemoglobin");
    assert!(out.notes.iter().any(|n| n.contains("Vitamin D")));
}

#[tokio::test]
async fn test_failure_falls_back_to_statistical() {
    let batch = batch();
    let out = run(&FailingAdjudicator, &batch).await;
    let (report, _) = reconcile(&batch);

    assert!(!out.is_adjudicated());
    match &out.consensus_source {
        ConsensusSource::Statistical { reason } => assert!(reason.contains("503"), "{}", reason),
        other => panic!("expected fallback, got {:?}", other),
    }
    assert_eq!(out.output.biomarkers, report.to_output().biomarkers);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back_to_statistical() {
    let out = run(&HangingAdjudicator, &batch()).await;
    match &out.consensus_source {
        ConsensusSource::Statistical { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected fallback, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nothing_usable_falls_back() {
    let judge = ScriptedAdjudicator::new(
        r#"{"biomarkers": [{"test_name": "Vitamin D", "value": 30, "unit": "ng/mL"}]}"#,
    );
    let out = run(&judge, &batch()).await;
    assert!(!out.is_adjudicated());
}

#[tokio::test]
async fn test_total_failure_skips_adjudication() {
    let judge =
        ScriptedAdjudicator::new(r#"{"biomarkers": [{"test_name": "Hemoglobin", "value": 1}]}"#);
    let batch = ExtractionBatch::new()
        .with_outcome("a", AgentOutcome::failed(AgentFailureKind::Crashed, "boom"));
    let out = run(&judge, &batch).await;

    assert!(!out.is_adjudicated());
    assert!(out.output.biomarkers.is_empty());
    assert!(judge.seen_agents.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_output_serializes_flat() {
    let out = run(&FailingAdjudicator, &batch()).await;
    let json = serde_json::to_value(&out).unwrap();
    assert!(json["biomarkers"].is_array());
    assert_eq!(json["metadata"]["total_models"], 4);
    assert_eq!(json["consensus_source"]["source"], "statistical");
}
