//! Record Matcher - groups the same biomarker across agents
//!
//! ```text
//! records (sorted by agent, then input order)
//!   │
//!   ├─ exact join:      a group already holds this canonical name
//!   ├─ similarity join: similarity(group key, name) >= threshold
//!   └─ otherwise:       new singleton group
//! ```
//!
//! A group never holds two records from the same agent, and every record
//! lands in exactly one group.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::types::NormalizedRecord;

/// Records from different agents judged to describe the same biomarker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchGroup {
    pub id: usize,
    /// Most frequent member canonical name
    pub key: String,
    pub members: Vec<NormalizedRecord>,
}

impl MatchGroup {
    fn seed(id: usize, record: NormalizedRecord) -> Self {
        Self {
            id,
            key: record.canonical_name.clone(),
            members: vec![record],
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains_agent(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m.agent_id == agent_id)
    }

    pub fn contains_name(&self, canonical_name: &str) -> bool {
        self.members.iter().any(|m| m.canonical_name == canonical_name)
    }

    /// Contributing agent ids in member order
    pub fn agents(&self) -> Vec<String> {
        self.members.iter().map(|m| m.agent_id.clone()).collect()
    }

    fn push(&mut self, record: NormalizedRecord) {
        self.members.push(record);
        self.key = majority_name(&self.members);
    }
}

/// Most frequent canonical name; ties go to the lexicographically smaller.
fn majority_name(members: &[NormalizedRecord]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for m in members {
        *counts.entry(m.canonical_name.as_str()).or_default() += 1;
    }
    // BTreeMap iterates in ascending order, so the first maximum is the smallest name
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((name, count));
        }
    }
    best.map(|(name, _)| name.to_string()).unwrap_or_default()
}

fn digit_runs(name: &str) -> Vec<&str> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Names that differ in a short token (`ldl` / `hdl`, `mch` / `mchc`) or in
/// any number (`free t3` / `free t4`) are distinct tests.
fn guarded_apart(a: &str, b: &str) -> bool {
    if digit_runs(a) != digit_runs(b) {
        return true;
    }
    let ta: Vec<&str> = a.split_whitespace().collect();
    let tb: Vec<&str> = b.split_whitespace().collect();
    ta.len() == tb.len()
        && ta
            .iter()
            .zip(&tb)
            .any(|(x, y)| x != y && x.chars().count() <= 4 && y.chars().count() <= 4)
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// Similarity of two canonical names in [0, 1].
///
/// The larger of normalized Levenshtein and token Jaccard, forced to 0 when
/// the names are guarded apart.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if guarded_apart(a, b) {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b).max(token_jaccard(a, b))
}

/// Groups normalized records into a partition of [`MatchGroup`]s
#[derive(Debug, Clone)]
pub struct RecordMatcher {
    similarity_threshold: f64,
}

impl RecordMatcher {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    /// Partition `records`. Group ids are assigned in creation order.
    pub fn group(&self, mut records: Vec<NormalizedRecord>) -> Vec<MatchGroup> {
        // Stable: keeps each agent's input order
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let mut groups: Vec<MatchGroup> = Vec::new();
        for record in records {
            match self.choose_group(&groups, &record) {
                Some(idx) => groups[idx].push(record),
                None => {
                    let id = groups.len();
                    groups.push(MatchGroup::seed(id, record));
                }
            }
        }

        debug!(
            groups = groups.len(),
            singletons = groups.iter().filter(|g| g.len() == 1).count(),
            "Matched records into groups"
        );
        groups
    }

    fn choose_group(&self, groups: &[MatchGroup], record: &NormalizedRecord) -> Option<usize> {
        let open = || {
            groups
                .iter()
                .enumerate()
                .filter(|(_, g)| !g.contains_agent(&record.agent_id))
        };

        let exact: Vec<usize> = open()
            .filter(|(_, g)| g.contains_name(&record.canonical_name))
            .map(|(i, _)| i)
            .collect();
        if !exact.is_empty() {
            return best_of(groups, exact);
        }

        let similar: Vec<usize> = open()
            .filter(|(_, g)| {
                name_similarity(&g.key, &record.canonical_name) >= self.similarity_threshold
            })
            .map(|(i, _)| i)
            .collect();
        best_of(groups, similar)
    }
}

/// Higher membership, then smaller key, then lower id.
fn best_of(groups: &[MatchGroup], candidates: Vec<usize>) -> Option<usize> {
    candidates.into_iter().min_by(|&a, &b| {
        let (ga, gb) = (&groups[a], &groups[b]);
        gb.len()
            .cmp(&ga.len())
            .then_with(|| ga.key.cmp(&gb.key))
            .then_with(|| ga.id.cmp(&gb.id))
    })
}
