//! Agent error taxonomy
//!
//! Every way an extraction agent can fail is represented here and maps onto
//! exactly one [`AgentFailureKind`], which is what the consensus core sees.
//!
//! | Variant        | Failure kind | Retriable |
//! |----------------|--------------|-----------|
//! | Request        | crashed      | yes       |
//! | Http (5xx/429) | crashed      | yes       |
//! | Http (other)   | crashed      | no        |
//! | Timeout        | timed_out    | yes       |
//! | Malformed      | malformed    | yes       |
//! | Empty          | empty        | no        |
//! | Panicked       | crashed      | no        |
//! | Io             | crashed      | no        |
//! | Configuration  | crashed      | no        |

use std::path::PathBuf;
use std::time::Duration;

use consensus::AgentFailureKind;
use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Transport failure talking to an inference endpoint
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Output that could not be turned into biomarker records
    #[error("Malformed output: {0}")]
    Malformed(String),

    #[error("No biomarkers returned")]
    Empty,

    #[error("Agent task panicked: {0}")]
    Panicked(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration: {0}")]
    Configuration(String),
}

impl AgentError {
    /// The failure kind recorded in the extraction batch.
    pub fn failure_kind(&self) -> AgentFailureKind {
        match self {
            Self::Timeout(_) => AgentFailureKind::TimedOut,
            Self::Malformed(_) => AgentFailureKind::Malformed,
            Self::Empty => AgentFailureKind::Empty,
            Self::Request(_)
            | Self::Http { .. }
            | Self::Panicked(_)
            | Self::Io { .. }
            | Self::Configuration(_) => AgentFailureKind::Crashed,
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) | Self::Malformed(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Errors reading or writing CSV files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} has no data row")]
    NoDataRow(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            AgentError::Timeout(Duration::from_secs(5)).failure_kind(),
            AgentFailureKind::TimedOut
        );
        assert_eq!(
            AgentError::Malformed("x".into()).failure_kind(),
            AgentFailureKind::Malformed
        );
        assert_eq!(AgentError::Empty.failure_kind(), AgentFailureKind::Empty);
        assert_eq!(
            AgentError::Panicked("boom".into()).failure_kind(),
            AgentFailureKind::Crashed
        );
    }

    #[test]
    fn test_retriable() {
        assert!(AgentError::Request("reset".into()).is_retriable());
        assert!(AgentError::Http {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(!AgentError::Http {
            status: 401,
            body: String::new()
        }
        .is_retriable());
        assert!(!AgentError::Empty.is_retriable());
    }

    #[test]
    fn test_display() {
        let err = AgentError::Http {
            status: 500,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "Endpoint returned 500: overloaded");
    }
}
