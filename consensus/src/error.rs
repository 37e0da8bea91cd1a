//! Error types for the consensus core
//!
//! Partial information is the normal case here, so almost nothing in the
//! pipeline is an error: degraded records, failed agents and omitted groups
//! are carried as annotated values (see [`crate::types::NormalizationQuality`],
//! [`crate::resolver::Resolution`], [`crate::events::QualityEvent`]).
//! What remains are configuration problems, which are rejected when the
//! engine is constructed, and the document-level total failure.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Error type for consensus operations
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Total extraction failure: {successful} of {total} agents produced usable output")]
    TotalFailure { total: usize, successful: usize },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Problems found while loading or validating a [`crate::config::ConsensusConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("min_agreement_count must be at least 1")]
    ZeroAgreement,

    #[error("alias '{alias}' maps to both '{first}' and '{second}'")]
    AliasCollision {
        alias: String,
        first: String,
        second: String,
    },

    #[error("conversion {from} -> {to} has non-positive factor {factor}")]
    BadConversion { from: String, to: String, factor: f64 },

    #[error("plausibility band for '{name}' has min {min} above max {max}")]
    InvertedBand { name: String, min: f64, max: f64 },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_failure_message() {
        let err = ConsensusError::TotalFailure {
            total: 3,
            successful: 0,
        };
        assert_eq!(
            err.to_string(),
            "Total extraction failure: 0 of 3 agents produced usable output"
        );
    }

    #[test]
    fn test_config_error_wraps() {
        let err: ConsensusError = ConfigError::ZeroAgreement.into();
        assert!(matches!(err, ConsensusError::InvalidConfig(_)));
        assert!(err.to_string().contains("min_agreement_count"));
    }
}
