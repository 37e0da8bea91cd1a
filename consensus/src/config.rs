//! Consensus configuration
//!
//! One immutable value passed to [`crate::ConsensusEngine::new`]. Nothing in
//! the core reads configuration from anywhere else.
//!
//! Sources, lowest precedence first:
//!
//! ```text
//! Default::default()  →  TOML file / string  →  CONSENSUS_* environment vars
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConsensusError, ConsensusResult};
use crate::normalize::names::clean_name;

/// Statistic used to collapse a cluster of agreeing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentralStatistic {
    Mean,
    Median,
}

impl CentralStatistic {
    /// Apply to a non-empty slice. The median of an even count is the
    /// midpoint of the two central values.
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            CentralStatistic::Mean => values.iter().sum::<f64>() / values.len() as f64,
            CentralStatistic::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}

/// How divergent numeric values are grouped and collapsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringPolicy {
    /// Two values agree when `|a - b| <= relative_tolerance * max(|a|, |b|)`
    pub relative_tolerance: f64,
    /// Floor on the tolerance so values near zero can still agree
    pub absolute_tolerance: f64,
    /// Used when every value agrees with every other
    pub converged: CentralStatistic,
    /// Used when a strict-majority cluster exists
    pub majority: CentralStatistic,
}

impl Default for ClusteringPolicy {
    fn default() -> Self {
        Self {
            relative_tolerance: 0.05,
            absolute_tolerance: 1e-9,
            converged: CentralStatistic::Mean,
            majority: CentralStatistic::Median,
        }
    }
}

impl ClusteringPolicy {
    pub fn within_tolerance(&self, a: f64, b: f64) -> bool {
        let scale = a.abs().max(b.abs());
        (a - b).abs() <= (self.relative_tolerance * scale).max(self.absolute_tolerance)
    }
}

/// Multiply values in `from` by `factor` to express them in `to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub factor: f64,
}

impl UnitConversion {
    pub fn new(from: &str, to: &str, factor: f64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            factor,
        }
    }
}

/// Physiologically plausible interval for one canonical biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityBand {
    pub min: f64,
    pub max: f64,
    /// Canonical unit the band is expressed in; `None` applies to any unit
    #[serde(default)]
    pub unit: Option<String>,
}

impl PlausibilityBand {
    pub fn new(min: f64, max: f64, unit: Option<&str>) -> Self {
        Self {
            min,
            max,
            unit: unit.map(str::to_string),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Full consensus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Records below this confidence are omitted
    pub confidence_threshold: f64,
    /// Minimum distinct agents that must report a biomarker
    pub min_agreement_count: usize,
    /// Minimum name similarity for a fuzzy group join
    pub similarity_threshold: f64,
    pub clustering: ClusteringPolicy,
    /// Display name → aliases
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Unit key (lower-case, no whitespace, µ → u) → canonical spelling
    pub units: BTreeMap<String, String>,
    pub conversions: Vec<UnitConversion>,
    /// Canonical name → band
    pub plausibility: BTreeMap<String, PlausibilityBand>,
    /// Canonical names that are dimensionless
    pub unit_exempt: Vec<String>,
    /// Accepted non-numeric results
    pub qualitative_vocabulary: Vec<String>,
    /// Confidence multiplier per validation finding
    pub demotion_factor: f64,
    /// Minimum breadth contribution to confidence
    pub breadth_floor: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            min_agreement_count: 2,
            similarity_threshold: 0.88,
            clustering: ClusteringPolicy::default(),
            aliases: default_aliases(),
            units: default_units(),
            conversions: vec![
                UnitConversion::new("g/L", "g/dL", 0.1),
                UnitConversion::new("mg/L", "mg/dL", 0.1),
            ],
            plausibility: default_plausibility(),
            unit_exempt: ["ph", "specific gravity", "inr"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            qualitative_vocabulary: [
                "positive",
                "negative",
                "reactive",
                "non-reactive",
                "nonreactive",
                "trace",
                "detected",
                "not detected",
                "normal",
                "abnormal",
                "nil",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            demotion_factor: 0.85,
            breadth_floor: 0.5,
        }
    }
}

fn default_aliases() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("Hemoglobin", &["Hb", "HGB", "Haemoglobin", "Hgb"]),
        (
            "RBC Count",
            &["Red Blood Cells", "RBC", "Erythrocytes", "Red Cell Count", "RBCs"],
        ),
        (
            "WBC Count",
            &["White Blood Cells", "WBC", "Leukocytes", "White Cell Count", "WBCs"],
        ),
        ("Platelets", &["PLT", "Thrombocytes", "Platelet Count", "PLAT"]),
        ("Hematocrit", &["HCT", "PCV", "Packed Cell Volume", "Haematocrit"]),
        ("MCV", &["Mean Corpuscular Volume", "Mean Cell Volume"]),
        ("MCH", &["Mean Corpuscular Hemoglobin", "Mean Cell Hemoglobin"]),
        ("MCHC", &["Mean Corpuscular Hemoglobin Concentration"]),
    ];
    table
        .iter()
        .map(|(name, aliases)| {
            (
                name.to_string(),
                aliases.iter().map(|a| a.to_string()).collect(),
            )
        })
        .collect()
}

fn default_units() -> BTreeMap<String, String> {
    let table: &[(&str, &str)] = &[
        ("mg/dl", "mg/dL"),
        ("mg/l", "mg/L"),
        ("g/dl", "g/dL"),
        ("g%", "g/dL"),
        ("g/100ml", "g/dL"),
        ("gm/dl", "g/dL"),
        ("g/l", "g/L"),
        ("k/ul", "10^3/uL"),
        ("10^3/ul", "10^3/uL"),
        ("x10^3/ul", "10^3/uL"),
        ("thousand/ul", "10^3/uL"),
        ("10^9/l", "10^3/uL"),
        ("x10^9/l", "10^3/uL"),
        ("million/ul", "10^6/uL"),
        ("10^6/ul", "10^6/uL"),
        ("x10^6/ul", "10^6/uL"),
        ("m/ul", "10^6/uL"),
        ("million/mm3", "10^6/uL"),
        ("10^6/mm3", "10^6/uL"),
        ("10^12/l", "10^6/uL"),
        ("fl", "fL"),
        ("pg", "pg"),
        ("%", "%"),
        ("u/l", "U/L"),
        ("iu/l", "U/L"),
        ("mmol/l", "mmol/L"),
        ("umol/l", "umol/L"),
        ("meq/l", "mEq/L"),
        ("uiu/ml", "uIU/mL"),
        ("miu/l", "uIU/mL"),
        ("ng/ml", "ng/mL"),
        ("pg/ml", "pg/mL"),
        ("ng/dl", "ng/dL"),
    ];
    table
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_plausibility() -> BTreeMap<String, PlausibilityBand> {
    let table: &[(&str, f64, f64, &str)] = &[
        ("hemoglobin", 2.0, 25.0, "g/dL"),
        ("hematocrit", 10.0, 75.0, "%"),
        ("rbc count", 1.0, 9.0, "10^6/uL"),
        ("wbc count", 0.5, 200.0, "10^3/uL"),
        ("platelets", 5.0, 2000.0, "10^3/uL"),
        ("mcv", 50.0, 150.0, "fL"),
        ("mch", 10.0, 50.0, "pg"),
        ("mchc", 20.0, 45.0, "g/dL"),
    ];
    table
        .iter()
        .map(|(name, min, max, unit)| {
            (
                name.to_string(),
                PlausibilityBand::new(*min, *max, Some(unit)),
            )
        })
        .collect()
}

impl ConsensusConfig {
    /// Parse a TOML document; omitted fields keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> ConsensusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConsensusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Override thresholds from `CONSENSUS_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("CONSENSUS_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = v;
        }
        if let Some(v) = env_parse("CONSENSUS_MIN_AGREEMENT") {
            self.min_agreement_count = v;
        }
        if let Some(v) = env_parse("CONSENSUS_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = v;
        }
        if let Some(v) = env_parse("CONSENSUS_RELATIVE_TOLERANCE") {
            self.clustering.relative_tolerance = v;
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_min_agreement_count(mut self, count: usize) -> Self {
        self.min_agreement_count = count;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_clustering(mut self, policy: ClusteringPolicy) -> Self {
        self.clustering = policy;
        self
    }

    pub fn with_alias(mut self, display_name: &str, aliases: &[&str]) -> Self {
        self.aliases.insert(
            display_name.to_string(),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn with_plausibility(mut self, canonical_name: &str, band: PlausibilityBand) -> Self {
        self.plausibility.insert(canonical_name.to_string(), band);
        self
    }

    /// Reject configurations that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("similarity_threshold", self.similarity_threshold),
            ("demotion_factor", self.demotion_factor),
            ("breadth_floor", self.breadth_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        if self.min_agreement_count == 0 {
            return Err(ConfigError::ZeroAgreement);
        }
        if !(self.clustering.relative_tolerance > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "clustering.relative_tolerance",
                value: self.clustering.relative_tolerance,
            });
        }
        if !(self.clustering.absolute_tolerance >= 0.0) {
            return Err(ConfigError::NotPositive {
                field: "clustering.absolute_tolerance",
                value: self.clustering.absolute_tolerance,
            });
        }
        for conv in &self.conversions {
            if !(conv.factor > 0.0) || !conv.factor.is_finite() {
                return Err(ConfigError::BadConversion {
                    from: conv.from.clone(),
                    to: conv.to.clone(),
                    factor: conv.factor,
                });
            }
        }
        for (name, band) in &self.plausibility {
            if band.min > band.max {
                return Err(ConfigError::InvertedBand {
                    name: name.clone(),
                    min: band.min,
                    max: band.max,
                });
            }
        }

        let mut seen: HashMap<String, &str> = HashMap::new();
        for (display, aliases) in &self.aliases {
            let own = clean_name(display);
            for alias in std::iter::once(display).chain(aliases.iter()) {
                let key = clean_name(alias);
                match seen.get(&key) {
                    Some(first) if clean_name(first) != own => {
                        return Err(ConfigError::AliasCollision {
                            alias: alias.clone(),
                            first: first.to_string(),
                            second: display.clone(),
                        });
                    }
                    _ => {
                        seen.insert(key, display.as_str());
                    }
                }
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}
