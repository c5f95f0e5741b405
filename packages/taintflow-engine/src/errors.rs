//! Error types for taintflow-engine
//!
//! Provides unified error handling across the crate.

use thiserror::Error;

/// Main error type for taintflow-engine operations
#[derive(Debug, Error)]
pub enum TaintFlowError {
    /// Configuration error (bad engine options, unknown entry scope)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Aggregated rule-set validation failure.
    ///
    /// Every problem found while compiling a rule set (duplicate id,
    /// malformed regex, empty predicate) is collected into one failure so
    /// callers see the full picture instead of the first offender.
    #[error("Rule validation failed with {} error(s): {}", .errors.len(), .errors.join("; "))]
    RuleValidation { errors: Vec<String> },

    /// Malformed or inconsistent input graph
    #[error("Graph error: {0}")]
    Graph(String),

    /// Analysis error
    #[error("Analysis error: {0}")]
    Analysis(String),
}

impl TaintFlowError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TaintFlowError::Config(msg.into())
    }

    /// Create a graph error
    pub fn graph(msg: impl Into<String>) -> Self {
        TaintFlowError::Graph(msg.into())
    }

    /// Create an analysis error
    pub fn analysis(msg: impl Into<String>) -> Self {
        TaintFlowError::Analysis(msg.into())
    }
}

/// Result type alias for taintflow operations
pub type Result<T> = std::result::Result<T, TaintFlowError>;
