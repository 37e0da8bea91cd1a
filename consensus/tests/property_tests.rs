//! Property-style tests for the consensus pipeline.
//!
//! Verifies:
//! 1. Matching is a partition: every normalized record lands in exactly one group
//! 2. No group holds two records from the same agent
//! 3. Emitted records meet the agreement count and the confidence threshold
//! 4. Adding an agreeing agent never lowers confidence (fixed total_models)
//! 5. Adding a dissenting outlier never raises confidence, including one
//!    that sits just outside tolerance of the consensus value
//! 6. Wider spread among agreeing values never raises confidence
//! 7. Normalization is idempotent on canonical names
//! 8. Reconciliation is deterministic
//! 9. Zero agents means total failure with all-zero statistics

use consensus::{
    AgentOutcome, ConsensusConfig, ConsensusEngine, ExtractionBatch, Normalizer,
    RawBiomarkerRecord, RecordMatcher,
};

/// Small deterministic generator so sweeps are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn unit_f64(&mut self) -> f64 {
        (self.next() % 10_000) as f64 / 10_000.0
    }
}

const NAMES: &[(&str, f64, &str)] = &[
    ("Hemoglobin", 13.5, "g/dL"),
    ("Hgb", 13.5, "g/dL"),
    ("Haemoglobin", 13.5, "g/dL"),
    ("Glucose", 92.0, "mg/dL"),
    ("Creatinine", 0.9, "mg/dL"),
    ("Creatinin", 0.9, "mg/dL"),
    ("LDL Cholesterol", 110.0, "mg/dL"),
    ("HDL Cholesterol", 55.0, "mg/dL"),
    ("Free T4", 1.2, "ng/dL"),
    ("Free T3", 3.1, "pg/mL"),
    ("Platelets", 250.0, "10^3/uL"),
    ("PLT", 250.0, "K/uL"),
    ("Sodium", 140.0, "mEq/L"),
    ("MCH", 29.0, "pg"),
    ("MCHC", 33.0, "g/dL"),
];

fn random_batch(rng: &mut Lcg, agents: usize) -> ExtractionBatch {
    let mut batch = ExtractionBatch::new().with_declared_total(agents);
    for a in 0..agents {
        let agent = format!("agent_{}", a);
        let count = 1 + rng.below(8);
        let mut records = Vec::new();
        for _ in 0..count {
            let (name, base, unit) = NAMES[rng.below(NAMES.len())];
            // Mostly close to the base value, occasionally far off
            let noise = if rng.below(5) == 0 {
                1.0 + rng.unit_f64() * 3.0
            } else {
                1.0 + (rng.unit_f64() - 0.5) * 0.04
            };
            records.push(RawBiomarkerRecord::new(&agent, name, base * noise).with_unit(unit));
        }
        batch.insert(&agent, AgentOutcome::success(records));
    }
    batch
}

fn engine_with(config: ConsensusConfig) -> ConsensusEngine {
    ConsensusEngine::new(config).expect("test config is valid")
}

fn glucose_batch(values: &[f64], declared_total: usize) -> ExtractionBatch {
    let mut batch = ExtractionBatch::new().with_declared_total(declared_total);
    for (i, v) in values.iter().enumerate() {
        let agent = format!("agent_{}", i);
        batch.insert(
            &agent,
            AgentOutcome::success(vec![
                RawBiomarkerRecord::new(&agent, "Glucose", *v).with_unit("mg/dL")
            ]),
        );
    }
    batch
}

/// Value and confidence of the glucose record with no threshold applied.
fn glucose_record(values: &[f64], declared_total: usize) -> Option<(f64, f64)> {
    let engine = engine_with(ConsensusConfig::default().with_confidence_threshold(0.0));
    let report = engine.reconcile(&glucose_batch(values, declared_total));
    let record = report.record("glucose")?;
    Some((record.value.numeric()?, record.confidence))
}

fn glucose_confidence(values: &[f64], declared_total: usize) -> f64 {
    glucose_record(values, declared_total).map_or(0.0, |(_, confidence)| confidence)
}

// ── Property: matching is a partition ───────────────────────────────

#[test]
fn prop_matching_partitions_records() {
    let config = ConsensusConfig::default();
    let normalizer = Normalizer::new(&config);
    let matcher = RecordMatcher::new(config.similarity_threshold);
    let mut rng = Lcg(7);

    for agents in 1..=6 {
        for _ in 0..20 {
            let batch = random_batch(&mut rng, agents);
            let mut normalized = Vec::new();
            for (agent_id, outcome) in &batch.outcomes {
                if let AgentOutcome::Success { records } = outcome {
                    normalized.extend(normalizer.normalize_all(agent_id, records));
                }
            }
            let input_count = normalized.len();
            let mut expected: Vec<String> = normalized
                .iter()
                .map(|r| format!("{}|{}|{:?}", r.agent_id, r.raw.test_name, r.numeric_value))
                .collect();

            let groups = matcher.group(normalized);
            let mut seen: Vec<String> = groups
                .iter()
                .flat_map(|g| g.members.iter())
                .map(|r| format!("{}|{}|{:?}", r.agent_id, r.raw.test_name, r.numeric_value))
                .collect();

            assert_eq!(
                seen.len(),
                input_count,
                "groups must hold every record exactly once ({} agents)",
                agents
            );
            expected.sort();
            seen.sort();
            assert_eq!(seen, expected, "group members must be the input records");

            for group in &groups {
                assert!(!group.is_empty(), "no empty groups");
                let mut agents_in_group = group.agents();
                agents_in_group.sort();
                agents_in_group.dedup();
                assert_eq!(
                    agents_in_group.len(),
                    group.len(),
                    "group '{}' holds two records from one agent",
                    group.key
                );
            }
        }
    }
}

// ── Property: emitted records satisfy the thresholds ────────────────

#[test]
fn prop_emitted_records_meet_thresholds() {
    let mut rng = Lcg(42);
    for (min_agreement, threshold) in [(1, 0.0), (2, 0.7), (3, 0.5), (2, 0.9)] {
        let config = ConsensusConfig::default()
            .with_min_agreement_count(min_agreement)
            .with_confidence_threshold(threshold);
        let engine = engine_with(config);

        for agents in 1..=6 {
            for _ in 0..10 {
                let report = engine.reconcile(&random_batch(&mut rng, agents));
                for record in &report.records {
                    assert!(
                        record.agreement_count >= min_agreement,
                        "'{}' emitted with agreement {} < {}",
                        record.test_name,
                        record.agreement_count,
                        min_agreement
                    );
                    assert!(
                        record.confidence >= threshold,
                        "'{}' emitted with confidence {} < {}",
                        record.test_name,
                        record.confidence,
                        threshold
                    );
                    assert!((0.0..=1.0).contains(&record.confidence));
                    assert_eq!(record.agreement_count, record.contributing_agents.len());
                    assert!(record.agreement_count <= report.statistics.total_models);
                }

                let stats = &report.statistics;
                assert!((0.0..=1.0).contains(&stats.extraction_success_rate));
                assert!((0.0..=1.0).contains(&stats.consensus_confidence));
                assert!((0.0..=1.0).contains(&stats.model_agreement));
                assert_eq!(
                    stats.groups_total,
                    report.records.len() + report.omissions.len() + report.rejections.len(),
                    "every group must end as a record, an omission or a rejection"
                );
            }
        }
    }
}

// ── Property: an agreeing agent never lowers confidence ─────────────

#[test]
fn prop_agreeing_agent_never_lowers_confidence() {
    let total = 8;
    let base = [92.0, 92.5, 91.5, 92.2, 91.8, 92.1];

    for n in 2..base.len() {
        let values = &base[..n];
        let before = glucose_confidence(values, total);

        let mean = values.iter().sum::<f64>() / n as f64;
        let mut extended = values.to_vec();
        extended.push(mean);
        let after = glucose_confidence(&extended, total);

        assert!(
            after >= before - 1e-12,
            "adding an agreeing agent lowered confidence: {} -> {} ({} agents)",
            before,
            after,
            n
        );
    }
}

// ── Property: an outlier never raises confidence ────────────────────

#[test]
fn prop_outlier_never_raises_confidence() {
    let total = 8;
    let base = [92.0, 92.5, 91.5, 92.2, 91.8, 92.1];

    for n in 2..=base.len() {
        for outlier in [180.0, 400.0, 10.0] {
            let values = &base[..n];
            let before = glucose_confidence(values, total);

            let mut extended = values.to_vec();
            extended.push(outlier);
            let after = glucose_confidence(&extended, total);

            assert!(
                after <= before + 1e-12,
                "outlier {} raised confidence: {} -> {} ({} agents)",
                outlier,
                before,
                after,
                n
            );
        }
    }
}

// ── Property: a near-miss outlier never raises confidence ──────────

#[test]
fn prop_near_miss_outlier_never_raises_confidence() {
    let tolerance = ConsensusConfig::default().clustering.relative_tolerance;
    let bases: [(&[f64], usize); 5] = [
        (&[10.0, 10.4], 3),
        (&[92.0, 92.5], 4),
        (&[92.0, 92.5, 91.5], 4),
        (&[92.0, 92.5, 91.5, 92.2, 91.8], 8),
        (&[13.5, 13.4, 13.6, 13.5], 6),
    ];

    // 10.8 agrees with 10.4 but not with 10.0 or the 10.2 consensus
    assert!(glucose_confidence(&[10.0, 10.4, 10.8], 3) <= glucose_confidence(&[10.0, 10.4], 3));

    for (values, total) in bases {
        let (consensus, before) =
            glucose_record(values, total).expect("base values produce a record");

        for factor in [1.1, 1.4, 1.8] {
            for direction in [1.0, -1.0] {
                // Outside tolerance of the consensus value, possibly inside
                // tolerance of one of the existing values
                let outlier = consensus * (1.0 + direction * tolerance * factor);
                let mut extended = values.to_vec();
                extended.push(outlier);
                let after = glucose_confidence(&extended, total);

                assert!(
                    after <= before + 1e-12,
                    "outlier {} raised confidence: {} -> {} (base {:?})",
                    outlier,
                    before,
                    after,
                    values
                );
            }
        }
    }
}

// ── Property: wider spread never raises confidence ──────────────────

#[test]
fn prop_spread_never_raises_confidence() {
    let total = 3;
    let mut previous = f64::INFINITY;

    for step in 0..=10 {
        let spread = step as f64 * 0.4;
        let values = [92.0 - spread / 2.0, 92.0, 92.0 + spread / 2.0];
        let confidence = glucose_confidence(&values, total);
        assert!(
            confidence <= previous + 1e-12,
            "spread {} raised confidence from {} to {}",
            spread,
            previous,
            confidence
        );
        previous = confidence;
    }
}

// ── Property: normalization is idempotent ───────────────────────────

#[test]
fn prop_normalization_is_idempotent() {
    let normalizer = Normalizer::new(&ConsensusConfig::default());

    for (name, value, unit) in NAMES {
        let raw = RawBiomarkerRecord::new("a", name, *value).with_unit(unit);
        let once = normalizer.normalize("a", &raw);
        let again = normalizer.normalize("a", &raw);
        assert_eq!(once, again, "normalizing '{}' twice differs", name);

        // Feeding the display name back resolves to the same canonical name
        let display = RawBiomarkerRecord::new("a", &once.display_name, *value).with_unit(unit);
        let reparsed = normalizer.normalize("a", &display);
        assert_eq!(
            reparsed.canonical_name, once.canonical_name,
            "display name '{}' of '{}' does not resolve back",
            once.display_name, name
        );

        // Same for the canonical unit
        if let Some(canonical_unit) = once.unit.as_deref() {
            let reunit = RawBiomarkerRecord::new("a", name, *value).with_unit(canonical_unit);
            assert_eq!(
                normalizer.normalize("a", &reunit).unit.as_deref(),
                Some(canonical_unit),
                "canonical unit '{}' is not a fixed point",
                canonical_unit
            );
        }
    }
}

// ── Property: reconciliation is deterministic ───────────────────────

#[test]
fn prop_reconcile_is_deterministic() {
    let engine = engine_with(ConsensusConfig::default());
    let mut rng = Lcg(1234);

    for agents in 1..=5 {
        let batch = random_batch(&mut rng, agents);
        let first = engine.reconcile(&batch);
        let second = engine.reconcile(&batch);
        assert_eq!(first.records, second.records);
        assert_eq!(first.omissions, second.omissions);
        assert_eq!(first.statistics, second.statistics);
        assert_eq!(first.to_output(), second.to_output());
    }
}

// ── Property: zero agents is total failure ──────────────────────────

#[test]
fn prop_zero_agents_is_total_failure() {
    for min_agreement in 1..=4 {
        let engine =
            engine_with(ConsensusConfig::default().with_min_agreement_count(min_agreement));
        let report = engine.reconcile(&ExtractionBatch::new());
        let stats = &report.statistics;
        assert!(stats.total_failure);
        assert_eq!(stats.total_models, 0);
        assert_eq!(stats.extraction_success_rate, 0.0);
        assert_eq!(stats.consensus_confidence, 0.0);
        assert_eq!(stats.model_agreement, 0.0);
        assert!(report.records.is_empty());
    }
}
