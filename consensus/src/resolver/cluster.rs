//! Numeric clustering of agent values
//!
//! ```text
//! all pairs within tolerance ──────────────► converged statistic (mean)
//!            │ no
//!            ▼
//! plurality cluster (values pairwise within tolerance)
//!            │
//!   strict majority? ── yes ──► majority statistic (median) of cluster
//!            │ no
//!            ▼
//!   most reliable agent's value, else lower-median member value
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{CentralStatistic, ClusteringPolicy};
use crate::types::Qualifier;

/// Historical agreement rate per agent, in [0, 1]
pub type AgentReliability = BTreeMap<String, f64>;

/// One agent's numeric vote after unit conversion
#[derive(Debug, Clone, PartialEq)]
pub struct NumericVote {
    pub agent_id: String,
    pub value: f64,
    pub qualifier: Option<Qualifier>,
    pub weight: f64,
}

/// Which rule produced the consensus value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueBasis {
    /// Every value agreed within tolerance
    Converged,
    /// A strict-majority cluster existed
    Majority,
    /// Plurality cluster without a majority; one member value was selected
    Plurality,
    /// Majority vote over non-numeric results
    Qualitative,
}

/// Winning value and the indices of the votes that support it
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub value: f64,
    pub qualifier: Option<Qualifier>,
    pub supporters: Vec<usize>,
    pub basis: ValueBasis,
}

fn lower_median(values: &mut [f64]) -> Option<f64> {
    values.sort_by(f64::total_cmp);
    let mid = values.len().checked_sub(1)? / 2;
    values.get(mid).copied()
}

fn reliability_of(reliability: Option<&AgentReliability>, agent: &str) -> f64 {
    reliability
        .and_then(|r| r.get(agent))
        .copied()
        .unwrap_or(0.0)
}

/// Maximal runs of the sorted values whose members all agree pairwise.
///
/// Every cluster is a set of vote indices in ascending order. A value never
/// joins a cluster through a chain of neighbours, so a cluster spans at most
/// one tolerance.
pub fn agreement_clusters(values: &[f64], policy: &ClusteringPolicy) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut covered_to = 0;
    for start in 0..order.len() {
        let mut end = start + 1;
        while end < order.len()
            && order[start..end]
                .iter()
                .all(|&i| policy.within_tolerance(values[i], values[order[end]]))
        {
            end += 1;
        }
        // A window ending where the previous one ended is a subset of it
        if end <= covered_to {
            continue;
        }
        covered_to = end;
        let mut members = order[start..end].to_vec();
        members.sort_unstable();
        clusters.push(members);
    }
    clusters
}

/// Cluster the votes and pick a consensus value.
///
/// Non-finite votes never take part. `None` if no finite vote remains.
pub fn resolve_numeric(
    votes: &[NumericVote],
    policy: &ClusteringPolicy,
    reliability: Option<&AgentReliability>,
) -> Option<ClusterOutcome> {
    let finite: Vec<usize> = (0..votes.len())
        .filter(|&i| votes[i].value.is_finite())
        .collect();
    if finite.is_empty() {
        return None;
    }
    if finite.len() < votes.len() {
        let kept: Vec<NumericVote> = finite.iter().map(|&i| votes[i].clone()).collect();
        let mut outcome = resolve_numeric(&kept, policy, reliability)?;
        outcome.supporters = outcome.supporters.iter().map(|&i| finite[i]).collect();
        return Some(outcome);
    }
    let values: Vec<f64> = votes.iter().map(|v| v.value).collect();

    let converged = values
        .iter()
        .enumerate()
        .all(|(i, &a)| values[i + 1..].iter().all(|&b| policy.within_tolerance(a, b)));
    if converged {
        let supporters: Vec<usize> = (0..votes.len()).collect();
        return Some(ClusterOutcome {
            value: policy.converged.apply(&values),
            qualifier: majority_qualifier(votes, &supporters),
            supporters,
            basis: ValueBasis::Converged,
        });
    }

    let overall_median = CentralStatistic::Median.apply(&values);
    let has_signal = reliability.is_some_and(|r| votes.iter().any(|v| r.contains_key(&v.agent_id)));

    let clusters = agreement_clusters(&values, policy);

    let centre = |c: &[usize]| c.iter().map(|&i| values[i]).sum::<f64>() / c.len() as f64;
    let summed_reliability = |c: &[usize]| -> f64 {
        c.iter()
            .map(|&i| reliability_of(reliability, &votes[i].agent_id))
            .sum()
    };

    let winner = clusters.into_iter().filter(|c| !c.is_empty()).max_by(|a, b| {
        a.len()
            .cmp(&b.len())
            .then_with(|| {
                if has_signal {
                    summed_reliability(a).total_cmp(&summed_reliability(b))
                } else {
                    Ordering::Equal
                }
            })
            // Nearer the overall median wins, so compare reversed
            .then_with(|| {
                let da = (centre(a) - overall_median).abs();
                let db = (centre(b) - overall_median).abs();
                db.total_cmp(&da)
            })
            .then_with(|| centre(b).total_cmp(&centre(a)))
    })?;

    let cluster_values: Vec<f64> = winner.iter().map(|&i| values[i]).collect();
    let qualifier = majority_qualifier(votes, &winner);

    if winner.len() * 2 > votes.len() {
        return Some(ClusterOutcome {
            value: policy.majority.apply(&cluster_values),
            qualifier,
            supporters: winner,
            basis: ValueBasis::Majority,
        });
    }

    let most_reliable = if has_signal {
        winner
            .iter()
            .copied()
            .max_by(|&a, &b| {
                reliability_of(reliability, &votes[a].agent_id)
                    .total_cmp(&reliability_of(reliability, &votes[b].agent_id))
                    .then_with(|| values[b].total_cmp(&values[a]))
            })
            .map(|i| values[i])
    } else {
        None
    };
    let value = match most_reliable {
        Some(value) => value,
        None => lower_median(&mut cluster_values.clone())?,
    };

    Some(ClusterOutcome {
        value,
        qualifier,
        supporters: winner,
        basis: ValueBasis::Plurality,
    })
}

/// Most common qualifier among the supporters; no qualifier wins ties.
fn majority_qualifier(votes: &[NumericVote], supporters: &[usize]) -> Option<Qualifier> {
    let mut counts: BTreeMap<Option<Qualifier>, usize> = BTreeMap::new();
    for &i in supporters {
        *counts.entry(votes[i].qualifier).or_default() += 1;
    }
    let mut best: Option<(Option<Qualifier>, usize)> = None;
    for (q, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((q, count));
        }
    }
    best.and_then(|(q, _)| q)
}
