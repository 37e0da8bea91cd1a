//! Per-record confidence scoring
//!
//! ```text
//! breadth   = Σ weight(supporters) / total_models
//! cohesion  = sqrt(supporters / value_reporters)
//! tightness = clamp(1 - 0.5 · CV / relative_tolerance)
//!
//! confidence = clamp((floor + (1 - floor) · breadth) · cohesion · tightness)
//! ```
//!
//! CV is the mean absolute deviation of the supporting values from their
//! mean, divided by the absolute mean.

use serde::{Deserialize, Serialize};

/// Components of a confidence score, kept for the detailed report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub breadth: f64,
    pub cohesion: f64,
    pub tightness: f64,
    pub score: f64,
}

/// Inputs to [`score`]
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs<'a> {
    /// Normalization weights of the supporting records
    pub supporter_weights: &'a [f64],
    /// Supporting numeric values; empty for qualitative results
    pub supporter_values: &'a [f64],
    /// Members of the group that reported any value
    pub value_reporters: usize,
    pub total_models: usize,
    pub relative_tolerance: f64,
    pub breadth_floor: f64,
}

/// Spread of `values` relative to their mean; 0 for fewer than two values.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let mad = values.iter().map(|v| (v - mean).abs()).sum::<f64>() / values.len() as f64;
    if mad == 0.0 {
        return 0.0;
    }
    if mean == 0.0 {
        return f64::INFINITY;
    }
    mad / mean.abs()
}

pub fn score(inputs: ConfidenceInputs<'_>) -> ConfidenceBreakdown {
    let supporters = inputs.supporter_weights.len();
    if supporters == 0 || inputs.total_models == 0 || inputs.value_reporters == 0 {
        return ConfidenceBreakdown {
            breadth: 0.0,
            cohesion: 0.0,
            tightness: 0.0,
            score: 0.0,
        };
    }

    let breadth =
        (inputs.supporter_weights.iter().sum::<f64>() / inputs.total_models as f64).clamp(0.0, 1.0);
    let cohesion = (supporters as f64 / inputs.value_reporters as f64)
        .clamp(0.0, 1.0)
        .sqrt();
    let cv = coefficient_of_variation(inputs.supporter_values);
    let tightness = (1.0 - 0.5 * cv / inputs.relative_tolerance).clamp(0.0, 1.0);

    let floor = inputs.breadth_floor;
    let score = ((floor + (1.0 - floor) * breadth) * cohesion * tightness).clamp(0.0, 1.0);
    ConfidenceBreakdown {
        breadth,
        cohesion,
        tightness,
        score,
    }
}
