//! Structured error types for the Reticula ecosystem.

use thiserror::Error;

/// Unified error type for all Reticula operations.
#[derive(Debug, Error)]
pub enum ReticulaError {
    /// Parse error (malformed Newick input)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values, structural
    /// violations such as a node with more than two parents)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Numerical failure (non-positive-definite covariance, optimizer
    /// not converging within its evaluation budget)
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the Reticula ecosystem.
pub type Result<T> = std::result::Result<T, ReticulaError>;
